//! Server initiated GATT procedures
//!
//! Notifications can be sent at any time. An indication must be confirmed by the client before
//! the next indication can be sent on the same connection, the [`IndicationSlot`] enforces this
//! independently of any client request outstanding on the connection.

use crate::att::pdu::{self, Pdu};
use crate::pending::{self, Pending, Resolver};
use crate::Error;
use std::time::{Duration, Instant};

/// Create a *Handle Value Notification*
///
/// The value must fit in the notification, it is never truncated.
pub fn notification(handle: u16, value: Vec<u8>, mtu: u16) -> Result<Pdu, Error> {
    check_value(handle, &value, mtu)?;

    Ok(Pdu::HandleValueNotification { handle, value })
}

/// Create a *Handle Value Indication*
pub fn indication(handle: u16, value: Vec<u8>, mtu: u16) -> Result<Pdu, Error> {
    check_value(handle, &value, mtu)?;

    Ok(Pdu::HandleValueIndication { handle, value })
}

fn check_value(handle: u16, value: &[u8], mtu: u16) -> Result<(), Error> {
    if !pdu::is_valid_handle(handle) {
        Err(Error::InvalidParameter("attribute handle 0 is invalid"))
    } else if value.len() > usize::from(mtu) - 3 {
        Err(Error::InvalidParameter("value does not fit within the ATT MTU"))
    } else {
        Ok(())
    }
}

struct OutstandingIndication {
    handle: u16,
    deadline: Instant,
    resolver: Resolver<()>,
}

/// The single outstanding indication of a connection
pub struct IndicationSlot {
    timeout: Duration,
    outstanding: Option<OutstandingIndication>,
}

impl IndicationSlot {
    pub fn new(timeout: Duration) -> Self {
        IndicationSlot {
            timeout,
            outstanding: None,
        }
    }

    pub fn is_outstanding(&self) -> bool {
        self.outstanding.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.outstanding.as_ref().map(|o| o.deadline)
    }

    /// Take the slot for an indication of the attribute at `handle`
    ///
    /// The returned `Pending` resolves once the client confirms the indication.
    ///
    /// # Error
    /// `Busy` if an indication is not yet confirmed
    pub fn begin(&mut self, handle: u16, now: Instant) -> Result<Pending<()>, Error> {
        if self.outstanding.is_some() {
            return Err(Error::Busy);
        }

        let (resolver, pending) = pending::pending();

        self.outstanding = Some(OutstandingIndication {
            handle,
            deadline: now + self.timeout,
            resolver,
        });

        Ok(pending)
    }

    /// Give up the slot without an outcome because the indication could not be sent
    pub fn abort(&mut self, err: Error) {
        if let Some(outstanding) = self.outstanding.take() {
            outstanding.resolver.resolve(Err(err))
        }
    }

    /// Process a *Handle Value Confirmation*
    pub fn on_confirmation(&mut self) {
        match self.outstanding.take() {
            Some(outstanding) => {
                log::trace!("indication of {:#x} confirmed", outstanding.handle);

                outstanding.resolver.resolve(Ok(()))
            }
            None => log::warn!("received a confirmation without an outstanding indication"),
        }
    }

    /// Check the confirmation timeout
    ///
    /// `true` is returned if the indication timed out.
    pub fn check_timeout(&mut self, now: Instant) -> bool {
        match self.outstanding.take() {
            Some(outstanding) if outstanding.deadline <= now => {
                log::warn!("indication of {:#x} was not confirmed", outstanding.handle);

                outstanding.resolver.resolve(Err(Error::Timeout));

                true
            }
            outstanding => {
                self.outstanding = outstanding;

                false
            }
        }
    }

    /// Fail the outstanding indication because the connection closed
    pub fn close(&mut self, err: Error) {
        self.abort(err)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::att::client::TRANSACTION_TIMEOUT;

    #[test]
    fn one_indication_at_a_time() {
        let mut slot = IndicationSlot::new(TRANSACTION_TIMEOUT);

        let now = Instant::now();

        let mut first = slot.begin(3, now).unwrap();

        assert_eq!(Some(Error::Busy), slot.begin(3, now).err());

        slot.on_confirmation();

        assert_eq!(Some(Ok(())), first.try_take());
        assert!(slot.begin(3, now).is_ok());
    }

    #[test]
    fn unconfirmed_indication_times_out() {
        let mut slot = IndicationSlot::new(TRANSACTION_TIMEOUT);

        let now = Instant::now();

        let mut indication = slot.begin(3, now).unwrap();

        assert!(!slot.check_timeout(now));
        assert!(slot.check_timeout(now + TRANSACTION_TIMEOUT));
        assert_eq!(Some(Err(Error::Timeout)), indication.try_take());
        assert!(!slot.is_outstanding());
    }

    #[test]
    fn value_must_fit() {
        assert!(notification(3, vec![0; 20], 23).is_ok());
        assert!(notification(3, vec![0; 21], 23).is_err());
        assert!(indication(0, vec![], 23).is_err());
    }
}
