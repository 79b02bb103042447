use crate::error::Error;
use crate::negotiator::Negotiator;
use crate::peer_connection::{Applied, PeerConnection};
use crate::signal::{ServerEvent, SignalingLink};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::watch;

/// Participant counters broadcast by the hub. They carry no meaning for the protocol itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerCounts {
    pub connected: usize,
    pub ready: usize,
}

/// Couples a [PeerConnection] with its connection to the signaling hub: events from the hub are
/// fed into the state machine and signals produced by the state machine are sent to the hub.
pub struct Participant<N: Negotiator> {
    connection: Arc<PeerConnection<N>>,
    counts: watch::Sender<PeerCounts>,
}

impl<N: Negotiator> Participant<N> {
    pub fn new(connection: Arc<PeerConnection<N>>) -> Self {
        let (counts, _) = watch::channel(PeerCounts::default());
        Participant { connection, counts }
    }

    pub fn connection(&self) -> &Arc<PeerConnection<N>> {
        &self.connection
    }

    pub fn counts(&self) -> watch::Receiver<PeerCounts> {
        self.counts.subscribe()
    }

    /// Feed a single hub event into the connection.
    ///
    /// Returns the outcome of start-session and negotiation events. Every other event only
    /// updates local bookkeeping or closes the connection, and yields `None`.
    pub async fn handle(&self, event: ServerEvent) -> Result<Option<Applied>, Error> {
        match event {
            ServerEvent::Welcome { id } => {
                if !self.connection.assign_id(id) {
                    warn!("ignoring repeated welcome, participant id is already assigned");
                }
                debug!("joined hub as {id}");
            }
            ServerEvent::ConnectedCount { count } => {
                self.counts.send_modify(|c| c.connected = count);
            }
            ServerEvent::ReadyCount { count } => {
                self.counts.send_modify(|c| c.ready = count);
            }
            ServerEvent::StartSession {
                initiator,
                answerer,
            } => {
                return self.connection.begin_session(initiator, answerer).await.map(Some);
            }
            ServerEvent::SessionClosed { peer } => {
                self.connection.remote_closed(peer).await?;
            }
            event => {
                if let Ok((from, message)) = event.into_negotiation() {
                    debug!("received {} from {from}", message.kind());
                    return self.connection.apply_signal(message).await.map(Some);
                }
            }
        }
        Ok(None)
    }

    /// Drive the connection until either it's closed or the hub goes away.
    pub async fn run(&self, link: SignalingLink) -> Result<(), Error> {
        let SignalingLink {
            outbound,
            mut inbound,
        } = link;
        loop {
            tokio::select! {
                event = inbound.recv() => match event {
                    Some(event) => {
                        if let Err(e) = self.handle(event).await {
                            warn!("failed to process hub event: {e}");
                        }
                    }
                    None => {
                        info!("signaling hub closed the connection");
                        self.connection.close().await?;
                        return Err(Error::SignalingClosed);
                    }
                },
                signal = self.connection.listen() => match signal {
                    Some(signal) => {
                        if outbound.send(signal).is_err() {
                            self.connection.close().await?;
                            return Err(Error::SignalingClosed);
                        }
                    }
                    None => return Ok(()),
                },
            }
        }
    }
}

#[cfg(test)]
mod test {
    use crate::hub::SignalingHub;
    use crate::negotiator::mock::{Call, MockNegotiator, Sdp};
    use crate::negotiator::{Connectivity, TransportEvent};
    use crate::options::Options;
    use crate::participant::{PeerCounts, Participant};
    use crate::peer_connection::{Applied, ConnectionState, GuardViolation, PeerConnection, Role};
    use crate::signal::ServerEvent;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedSender;
    use tokio::sync::watch;

    type Events = UnboundedSender<TransportEvent<MockNegotiator>>;

    fn participant(name: &str) -> (Arc<Participant<MockNegotiator>>, Events) {
        let (negotiator, tx, rx) = MockNegotiator::new(name);
        let pc = PeerConnection::new(negotiator, rx, Options::default());
        (Arc::new(Participant::new(pc)), tx)
    }

    async fn eventually<F: Fn() -> bool>(what: &str, f: F) {
        for _ in 0..200 {
            if f() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }

    async fn wait_counts(counts: &mut watch::Receiver<PeerCounts>, ready: usize) {
        while counts.borrow_and_update().ready != ready {
            counts.changed().await.unwrap();
        }
    }

    #[tokio::test]
    async fn two_participants_negotiate_through_hub() {
        let hub = SignalingHub::new();
        let (a, a_events) = participant("a");
        let (b, b_events) = participant("b");

        let link = hub.link().await;
        let runner = a.clone();
        tokio::spawn(async move { runner.run(link).await });
        let link = hub.link().await;
        let runner = b.clone();
        tokio::spawn(async move { runner.run(link).await });

        // a signals readiness first, so it must become initiator
        let mut counts = a.counts();
        a.connection().start().await.unwrap();
        wait_counts(&mut counts, 1).await;
        b.connection().start().await.unwrap();
        wait_counts(&mut counts, 2).await;
        assert_eq!(*counts.borrow(), PeerCounts { connected: 2, ready: 2 });

        let (pa, pb) = (a.connection().clone(), b.connection().clone());
        eventually("roles", || pa.role().is_some() && pb.role().is_some()).await;
        assert_eq!(pa.role(), Some(Role::Initiator));
        assert_eq!(pb.role(), Some(Role::Answerer));

        // candidates from both sides race with the offer/answer exchange
        for i in 1..=3 {
            a_events
                .send(TransportEvent::LocalCandidate(format!("a{i}")))
                .unwrap();
            b_events
                .send(TransportEvent::LocalCandidate(format!("b{i}")))
                .unwrap();
        }

        eventually("candidates", || {
            pa.negotiator().applied_candidates().len() == 3
                && pb.negotiator().applied_candidates().len() == 3
        })
        .await;
        assert_eq!(pa.negotiator().applied_candidates(), vec!["b1", "b2", "b3"]);
        assert_eq!(pb.negotiator().applied_candidates(), vec!["a1", "a2", "a3"]);

        let offer = Sdp {
            kind: "offer".into(),
            sdp: "offer-from-a".into(),
        };
        let answer = Sdp {
            kind: "answer".into(),
            sdp: "answer-from-b".into(),
        };
        assert!(pb.negotiator().calls().contains(&Call::SetRemote(offer)));
        assert!(pa.negotiator().calls().contains(&Call::SetRemote(answer)));
        assert!(!pb.negotiator().calls().contains(&Call::CreateOffer));

        a_events
            .send(TransportEvent::Connectivity(Connectivity::Connected))
            .unwrap();
        b_events
            .send(TransportEvent::Connectivity(Connectivity::Connected))
            .unwrap();
        pa.connected().await.unwrap();
        pb.connected().await.unwrap();
        assert_eq!(pa.pending_candidates().await, 0);
        assert_eq!(pb.pending_candidates().await, 0);
    }

    #[tokio::test]
    async fn peer_leaving_closes_survivor() {
        let hub = SignalingHub::new();
        let (a, _a_events) = participant("a");
        let (b, _b_events) = participant("b");

        let link_a = hub.link().await;
        let runner = a.clone();
        let a_task = tokio::spawn(async move { runner.run(link_a).await });
        let link_b = hub.link().await;
        let runner = b.clone();
        let b_task = tokio::spawn(async move { runner.run(link_b).await });

        a.connection().start().await.unwrap();
        b.connection().start().await.unwrap();
        let pb = b.connection().clone();
        eventually("session", || pb.state() == ConnectionState::Answering).await;

        // a goes away: its runner ends once the connection is closed, dropping its link
        a.connection().close().await.unwrap();
        a_task.await.unwrap().unwrap();

        b.connection().connected().await.unwrap_err();
        assert_eq!(b.connection().state(), ConnectionState::Closed);
        b_task.await.unwrap().unwrap();
        for _ in 0..200 {
            if hub.connected_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(hub.connected_count().await, 0);
    }

    async fn settle(hub: &SignalingHub, connected: usize, ready: usize) {
        for _ in 0..200 {
            if hub.connected_count().await == connected && hub.ready_count().await == ready {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("hub did not settle at {connected} connected, {ready} ready");
    }

    #[tokio::test]
    async fn waiting_participant_survives_foreign_session() {
        let hub = SignalingHub::new();
        let (a, _a_events) = participant("a");
        let (b, _b_events) = participant("b");
        let (c, _c_events) = participant("c");
        let (d, _d_events) = participant("d");

        // c has started locally, but its readiness has not reached the hub yet
        let mut link_c = hub.link().await;
        c.connection().start().await.unwrap();

        let link = hub.link().await;
        let runner = a.clone();
        let a_task = tokio::spawn(async move { runner.run(link).await });
        let link = hub.link().await;
        let runner = b.clone();
        tokio::spawn(async move { runner.run(link).await });

        let mut counts = a.counts();
        a.connection().start().await.unwrap();
        wait_counts(&mut counts, 1).await;
        b.connection().start().await.unwrap();

        let outcome = loop {
            let event = link_c.inbound.recv().await.unwrap();
            let is_start = matches!(event, ServerEvent::StartSession { .. });
            let outcome = c.handle(event).await.unwrap();
            if is_start {
                break outcome;
            }
            assert_eq!(outcome, None);
        };
        assert!(matches!(
            outcome,
            Some(Applied::Discarded(GuardViolation::NotMember { .. }))
        ));
        assert_eq!(c.connection().state(), ConnectionState::AwaitingPeer);
        assert_eq!(c.connection().role(), None);

        // c's readiness arrives late and stays unpaired while a and b are in session
        let runner = c.clone();
        tokio::spawn(async move { runner.run(link_c).await });

        // a leaves: b is released and closes, c remains as the only ready participant
        a.connection().close().await.unwrap();
        a_task.await.unwrap().unwrap();
        settle(&hub, 1, 1).await;

        let link = hub.link().await;
        let runner = d.clone();
        tokio::spawn(async move { runner.run(link).await });
        d.connection().start().await.unwrap();

        let (pc, pd) = (c.connection().clone(), d.connection().clone());
        eventually("pairing of c and d", || {
            pc.role() == Some(Role::Initiator) && pd.role() == Some(Role::Answerer)
        })
        .await;
        let offer = Sdp {
            kind: "offer".into(),
            sdp: "offer-from-c".into(),
        };
        eventually("offer from c", || {
            pd.negotiator().calls().contains(&Call::SetRemote(offer.clone()))
        })
        .await;
        assert_eq!(pc.state(), ConnectionState::Initiating);
        assert_eq!(pd.state(), ConnectionState::Answering);
    }
}
