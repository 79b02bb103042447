use std::collections::VecDeque;

/// FIFO of remote candidates which arrived before the remote session description has been
/// applied. Entries leave the buffer only through [CandidateBuffer::drain], in arrival order.
#[derive(Debug)]
pub struct CandidateBuffer<C> {
    pending: VecDeque<C>,
}

impl<C> CandidateBuffer<C> {
    pub fn new() -> Self {
        CandidateBuffer {
            pending: VecDeque::new(),
        }
    }

    pub fn push(&mut self, candidate: C) {
        self.pending.push_back(candidate);
    }

    /// Take all pending candidates, oldest first, leaving the buffer empty.
    pub fn drain(&mut self) -> impl Iterator<Item = C> + '_ {
        self.pending.drain(..)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<C> Default for CandidateBuffer<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::CandidateBuffer;

    #[test]
    fn drains_in_arrival_order() {
        let mut buf = CandidateBuffer::new();
        buf.push("c1");
        buf.push("c2");
        buf.push("c3");
        assert_eq!(buf.len(), 3);
        let drained: Vec<_> = buf.drain().collect();
        assert_eq!(drained, vec!["c1", "c2", "c3"]);
        assert!(buf.is_empty());
    }
}
