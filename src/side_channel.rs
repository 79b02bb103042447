use crate::error::Error;
use arc_swap::ArcSwap;
use std::sync::Arc;
use tokio::sync::Notify;
use webrtc::data_channel::RTCDataChannel;

/// Data channel opened next to the media path of a negotiated connection. It is created by the
/// initiator and received by the answerer; exchanging messages over it is left to the caller
/// via [SideChannel::as_ref].
pub struct SideChannel {
    dc: Arc<RTCDataChannel>,
    status: Arc<ArcSwap<SideChannelState>>,
}

impl SideChannel {
    pub fn new(dc: Arc<RTCDataChannel>) -> Self {
        let status = Arc::new(ArcSwap::new(SideChannelState::waiting()));
        let s = Arc::downgrade(&status);
        dc.on_open(Box::new(move || {
            if let Some(status) = s.upgrade() {
                let old = status.swap(SideChannelState::open());
                if let SideChannelState::Waiting { ready } = &*old {
                    ready.notify_waiters();
                }
            }
            Box::pin(async move {})
        }));
        let s = Arc::downgrade(&status);
        dc.on_close(Box::new(move || {
            if let Some(status) = s.upgrade() {
                let old = status.swap(SideChannelState::closed_gracefully());
                if let SideChannelState::Waiting { ready } = &*old {
                    ready.notify_waiters();
                }
            }
            Box::pin(async move {})
        }));
        let s = Arc::downgrade(&status);
        dc.on_error(Box::new(move |e| {
            if let Some(status) = s.upgrade() {
                let old = status.swap(SideChannelState::failed(e.into()));
                if let SideChannelState::Waiting { ready } = &*old {
                    ready.notify_waiters();
                }
            }
            Box::pin(async move {})
        }));
        SideChannel { dc, status }
    }

    pub fn label(&self) -> &str {
        self.dc.label()
    }

    pub fn is_open(&self) -> bool {
        matches!(&**self.status.load(), SideChannelState::Open)
    }

    /// Wait until the channel leaves its initial state.
    ///
    /// # Returns
    ///
    /// If channel has been opened successfully, this method returns `Ok(true)`.
    /// If channel has been closed gracefully it returns `Ok(false)`.
    /// If channel has been closed due to failure it returns `Err`.
    pub async fn ready(&self) -> Result<bool, Error> {
        loop {
            let status = self.status.load_full();
            match &*status {
                SideChannelState::Open => return Ok(true),
                SideChannelState::Closed { reason: None } => return Ok(false),
                SideChannelState::Closed { reason: Some(e) } => return Err(e.clone()),
                SideChannelState::Waiting { ready } => {
                    let notified = ready.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();
                    // state could have changed before we registered for notification
                    if Arc::ptr_eq(&status, &self.status.load_full()) {
                        notified.await;
                    }
                }
            }
        }
    }

    pub async fn close(&self) -> Result<(), Error> {
        let old = self.status.swap(SideChannelState::closed_gracefully());
        if let SideChannelState::Waiting { ready } = &*old {
            ready.notify_waiters();
        }
        self.dc.close().await?;
        Ok(())
    }
}

impl AsRef<RTCDataChannel> for SideChannel {
    fn as_ref(&self) -> &RTCDataChannel {
        &self.dc
    }
}

impl std::fmt::Debug for SideChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SideChannel")
            .field("label", &self.dc.label())
            .field("state", &**self.status.load())
            .finish()
    }
}

#[derive(Debug)]
enum SideChannelState {
    /// Underlying data channel is waiting to become open.
    Waiting {
        /// Notifier used when the underlying data channel leaves the waiting state.
        ready: Notify,
    },
    Open,
    Closed {
        /// Optional error reason, why the channel has been closed.
        reason: Option<Error>,
    },
}

impl SideChannelState {
    fn waiting() -> Arc<Self> {
        Arc::new(SideChannelState::Waiting {
            ready: Notify::new(),
        })
    }

    fn open() -> Arc<Self> {
        Arc::new(SideChannelState::Open)
    }

    fn closed_gracefully() -> Arc<Self> {
        Arc::new(SideChannelState::Closed { reason: None })
    }

    fn failed(reason: Error) -> Arc<Self> {
        Arc::new(SideChannelState::Closed {
            reason: Some(reason),
        })
    }
}
