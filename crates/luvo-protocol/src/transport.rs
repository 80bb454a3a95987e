//! Request/response pairing over the API endpoint characteristic
//!
//! The lamp answers every request with exactly one notification and has
//! no sequence numbers, so a [`Link`] allows a single request in flight.
//! A request that was abandoned (timed out, or its future dropped) leaves
//! a reply owed. The next request first waits for it, up to the stale grace
//! period after the abandonment, and discards it so it is never paired with
//! the wrong request. A reply that misses even that deadline stays overdue:
//! while any is overdue, replies that do not fit the request in flight are
//! discarded as well.

use crate::commands::Command;
use crate::frame::Response;
use crate::types::{hex, ProtocolError, TransportError};

use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time to wait for a reply owed by an abandoned request, counted
/// from the moment it was abandoned
pub const DEFAULT_STALE_GRACE: Duration = DEFAULT_TIMEOUT;

/// Connected GATT characteristics of one lamp, supplied by the BLE layer.
///
/// Replies written by the lamp to the API endpoint are delivered separately,
/// through the notification channel handed to [`Link::new`].
pub trait Characteristic: Send + Sync + 'static {
    /// Write a command frame to the API endpoint (write with response)
    fn write(&self, frame: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Read the Current Scene characteristic
    fn read_current_scene(&self) -> impl Future<Output = Result<u8, TransportError>> + Send;
}

/// A decoded reply and how long the lamp took to send it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub response: Response,
    pub round_trip: Duration,
}

/// Replies the lamp still owes for abandoned requests
#[derive(Debug, Default)]
struct Debt {
    /// Expected before `deadline`
    owed: usize,
    deadline: Option<Instant>,
    /// Past their deadline but may still arrive
    overdue: usize,
}

impl Debt {
    fn total(&self) -> usize {
        self.owed + self.overdue
    }

    /// Account for one discarded notification. Returns false if nothing was owed.
    fn settle_one(&mut self) -> bool {
        if self.owed > 0 {
            self.owed -= 1;
            if self.owed == 0 {
                self.deadline = None;
            }
            true
        } else if self.overdue > 0 {
            self.overdue -= 1;
            true
        } else {
            false
        }
    }

    fn expire(&mut self) {
        self.overdue += self.owed;
        self.owed = 0;
        self.deadline = None;
    }
}

/// Reply owed to the link until settled
struct Pending<'a> {
    debt: &'a mut Debt,
    grace: Duration,
    settled: bool,
}

impl<'a> Pending<'a> {
    fn new(debt: &'a mut Debt, grace: Duration) -> Self {
        Self {
            debt,
            grace,
            settled: false,
        }
    }

    fn settle(&mut self) {
        self.settled = true;
    }

    /// Discard `data` against an overdue reply, if one is outstanding
    fn absorb_overdue(&mut self, data: &[u8]) -> bool {
        if self.debt.overdue == 0 {
            return false;
        }
        self.debt.overdue -= 1;
        tracing::warn!("Discarding overdue reply: {}", hex(data));
        true
    }
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.debt.owed += 1;
            self.debt.deadline = Some(Instant::now() + self.grace);
        }
    }
}

/// One connected characteristic plus its notification stream
pub struct Link<C> {
    characteristic: C,
    notifications: mpsc::Receiver<Vec<u8>>,
    debt: Debt,
    timeout: Duration,
    stale_grace: Duration,
}

impl<C: Characteristic> Link<C> {
    #[must_use]
    pub fn new(
        characteristic: C,
        notifications: mpsc::Receiver<Vec<u8>>,
        timeout: Duration,
        stale_grace: Duration,
    ) -> Self {
        Self {
            characteristic,
            notifications,
            debt: Debt::default(),
            timeout,
            stale_grace,
        }
    }

    /// Number of replies still owed by abandoned requests
    #[must_use]
    pub fn stale_replies(&self) -> usize {
        self.debt.total()
    }

    /// Send a request and wait for its reply.
    ///
    /// A device error reply is returned as [`ProtocolError::DeviceError`].
    pub async fn request(&mut self, command: &Command) -> Result<Exchange, ProtocolError> {
        self.discard_stale().await?;

        let kind = command.kind();
        let frame = command.encode();
        let Self {
            characteristic,
            notifications,
            debt,
            timeout,
            stale_grace,
        } = self;

        let mut pending = Pending::new(debt, *stale_grace);
        tracing::debug!("Sending {:?}: {}", kind, hex(&frame));

        if let Err(e) = characteristic.write(&frame).await {
            pending.settle();
            return Err(e.into());
        }

        let start = Instant::now();
        let deadline = start + *timeout;
        let (data, decoded) = loop {
            match tokio::time::timeout_at(deadline, notifications.recv()).await {
                Ok(Some(data)) => {
                    let decoded = Response::decode(&data, kind);
                    if decoded.is_err() && pending.absorb_overdue(&data) {
                        continue;
                    }
                    pending.settle();
                    break (data, decoded);
                }
                Ok(None) => {
                    pending.settle();
                    return Err(TransportError::ConnectionLost.into());
                }
                Err(_) => {
                    tracing::warn!("{:?} timed out after {:?}", kind, timeout);
                    return Err(ProtocolError::Timeout);
                }
            }
        };
        let round_trip = start.elapsed();

        tracing::debug!("Received reply to {:?} in {:?}: {}", kind, round_trip, hex(&data));

        match decoded? {
            Response::Error { code } => {
                tracing::warn!("Device rejected {:?} with code {:#04X}", kind, code);
                Err(ProtocolError::DeviceError { code })
            }
            response => Ok(Exchange {
                response,
                round_trip,
            }),
        }
    }

    /// Read the current scene id from its dedicated characteristic
    pub async fn read_current_scene(&self) -> Result<u8, ProtocolError> {
        match tokio::time::timeout(self.timeout, self.characteristic.read_current_scene()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ProtocolError::Timeout),
        }
    }

    /// Drop queued notifications and wait for replies owed by abandoned requests
    async fn discard_stale(&mut self) -> Result<(), ProtocolError> {
        loop {
            match self.notifications.try_recv() {
                Ok(data) => self.note_discarded(&data),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    return Err(TransportError::ConnectionLost.into());
                }
            }
        }

        while self.debt.owed > 0 {
            let deadline = self.debt.deadline.unwrap_or_else(Instant::now);
            match tokio::time::timeout_at(deadline, self.notifications.recv()).await {
                Ok(Some(data)) => self.note_discarded(&data),
                Ok(None) => return Err(TransportError::ConnectionLost.into()),
                Err(_) => {
                    tracing::warn!("{} owed replies are overdue", self.debt.owed);
                    self.debt.expire();
                }
            }
        }
        Ok(())
    }

    fn note_discarded(&mut self, data: &[u8]) {
        if self.debt.settle_one() {
            tracing::warn!("Discarding late reply: {}", hex(data));
        } else {
            tracing::warn!("Discarding unsolicited notification: {}", hex(data));
        }
    }
}
