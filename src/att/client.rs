//! Attribute client bearer
//!
//! A client may have at most one request outstanding on a connection. The [`ClientBearer`] keeps
//! the outstanding request and matches the responses of the server against it.
//!
//! ```text
//! Idle --send_request--> RequestSent --response / error response--> Idle
//!                             |
//!                             +--transaction timeout--> Idle (timed out)
//! ```

use super::pdu::{Pdu, PduOpcode};
use super::{TransferFormatError, TransferFormatInto, MIN_ATT_MTU};
use crate::Error;
use std::time::{Duration, Instant};

/// The transaction timeout of the attribute protocol
pub const TRANSACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// The state of the client side of a connection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionState {
    /// No request is outstanding
    Idle,
    /// A request was sent and its response has not been received
    RequestSent,
    /// No request is outstanding, the last request timed out
    TimedOut,
}

struct Transaction {
    request: PduOpcode,
    deadline: Instant,
}

/// The client side of the attribute protocol for one connection
pub struct ClientBearer {
    mtu: u16,
    timeout: Duration,
    transaction: Option<Transaction>,
    timed_out: bool,
}

impl ClientBearer {
    pub fn new(timeout: Duration) -> Self {
        ClientBearer {
            mtu: MIN_ATT_MTU,
            timeout,
            transaction: None,
            timed_out: false,
        }
    }

    pub fn state(&self) -> TransactionState {
        match (&self.transaction, self.timed_out) {
            (Some(_), _) => TransactionState::RequestSent,
            (None, true) => TransactionState::TimedOut,
            (None, false) => TransactionState::Idle,
        }
    }

    /// Get the ATT MTU of the connection
    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    /// Set the ATT MTU
    ///
    /// Values below the minimum ATT MTU are raised to the minimum.
    pub fn set_mtu(&mut self, mtu: u16) {
        self.mtu = mtu.max(MIN_ATT_MTU);
    }

    /// The deadline of the outstanding request
    pub fn deadline(&self) -> Option<Instant> {
        self.transaction.as_ref().map(|t| t.deadline)
    }

    /// Start a transaction
    ///
    /// The returned bytes are the PDU to send to the server. The outcome of the transaction is
    /// returned by a later call to [`on_response`](ClientBearer::on_response) or
    /// [`check_timeout`](ClientBearer::check_timeout).
    ///
    /// # Error
    /// * `Busy` if a request is already outstanding
    /// * `InvalidParameter` if `request` is not a request or is larger than the MTU
    pub fn send_request(&mut self, request: &Pdu, now: Instant) -> Result<Vec<u8>, Error> {
        if self.transaction.is_some() {
            return Err(Error::Busy);
        }

        let opcode = match request.opcode() {
            Some(opcode) if opcode.response().is_some() => opcode,
            _ => return Err(Error::InvalidParameter("only a request can start a transaction")),
        };

        if request.len_of_into() > usize::from(self.mtu) {
            return Err(Error::InvalidParameter("request is larger than the ATT MTU"));
        }

        log::trace!("sending ATT request {}", opcode);

        self.transaction = Some(Transaction {
            request: opcode,
            deadline: now + self.timeout,
        });

        self.timed_out = false;

        Ok(request.into_bytes())
    }

    /// Process a PDU received from the server that is a response
    ///
    /// The outcome of the outstanding transaction is returned. A response that arrives when no
    /// request is outstanding (for example after the transaction timed out) is dropped and `None`
    /// is returned.
    pub fn on_response(&mut self, response: Pdu) -> Option<Result<Pdu, Error>> {
        let transaction = match self.transaction.take() {
            Some(transaction) => transaction,
            None => {
                log::warn!(
                    "received ATT response {:?} without an outstanding request",
                    response.opcode()
                );

                return None;
            }
        };

        let expected = transaction.request.response();

        let outcome = match response {
            Pdu::ErrorResponse {
                request_opcode,
                error,
                handle,
            } if request_opcode == transaction.request.as_raw() => {
                log::debug!("ATT request {} failed for handle {:#x}: {}", transaction.request, handle, error);

                Err(Error::Att(error))
            }
            pdu if pdu.opcode() == expected => Ok(pdu),
            pdu => {
                log::warn!(
                    "expected a response to {}, received {:?}",
                    transaction.request,
                    pdu.opcode()
                );

                Err(Error::Decode(format!(
                    "unexpected response {:#x} to request {}",
                    pdu.raw_opcode(),
                    transaction.request
                )))
            }
        };

        Some(outcome)
    }

    /// End the outstanding transaction with a response that could not be decoded
    pub fn on_malformed_response(&mut self, err: TransferFormatError) -> Option<Error> {
        let transaction = self.transaction.take()?;

        log::warn!("response to ATT request {} is malformed: {}", transaction.request, err);

        Some(err.into())
    }

    /// Check the transaction timeout
    ///
    /// If the outstanding request has passed its deadline then the transaction is ended and
    /// `Timeout` is returned as its outcome. The bearer is then ready for another request.
    pub fn check_timeout(&mut self, now: Instant) -> Option<Error> {
        match self.transaction.take() {
            Some(transaction) if transaction.deadline <= now => {
                log::warn!("ATT request {} timed out", transaction.request);

                self.timed_out = true;

                Some(Error::Timeout)
            }
            transaction => {
                self.transaction = transaction;

                None
            }
        }
    }

    /// End the outstanding transaction because the connection closed
    pub fn close(&mut self) -> Option<Error> {
        self.transaction.take().map(|_| Error::ConnectionLost)
    }
}
