use crate::{
    api::Error,
    common::data::{RuleSet, ServerMessage},
};
use std::time::Duration;
use tokio::{sync::mpsc::UnboundedReceiver, time::Instant};

/// Counts the messages a stub server writes back to its driver.
///
/// A server announces itself once with `ready` and then acknowledges every configuration
/// batch with the full rule snapshot. The waiter remembers the port from the former and
/// the most recent snapshot from the latter.
pub struct AckWaiter {
    messages: UnboundedReceiver<ServerMessage>,
    port: Option<u16>,
    rules: RuleSet,
}

impl AckWaiter {
    pub fn new(messages: UnboundedReceiver<ServerMessage>) -> Self {
        Self {
            messages,
            port: None,
            rules: RuleSet::new(),
        }
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// The snapshot carried by the most recent acknowledgement.
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Waits for the `ready` message and returns the announced port.
    pub async fn wait_ready(&mut self, timeout: Duration) -> Result<u16, Error> {
        self.wait_ready_until(Instant::now() + timeout).await
    }

    pub async fn wait_ready_until(&mut self, deadline: Instant) -> Result<u16, Error> {
        loop {
            if let Some(port) = self.port {
                return Ok(port);
            }
            self.next(deadline, 0, 0).await?;
        }
    }

    /// Waits until `expected` acknowledgements have arrived and returns the last snapshot.
    pub async fn wait_acks(&mut self, expected: usize, timeout: Duration) -> Result<&RuleSet, Error> {
        self.wait_acks_until(expected, Instant::now() + timeout).await
    }

    pub async fn wait_acks_until(&mut self, expected: usize, deadline: Instant) -> Result<&RuleSet, Error> {
        let mut received = 0;

        while received < expected {
            if self.next(deadline, expected, received).await? {
                received += 1;
            }
        }

        Ok(&self.rules)
    }

    /// Consumes one message. Returns `true` if it was an acknowledgement.
    async fn next(&mut self, deadline: Instant, expected: usize, received: usize) -> Result<bool, Error> {
        let message = match tokio::time::timeout_at(deadline, self.messages.recv()).await {
            Err(_) => return Err(Error::AckTimeout { expected, received }),
            Ok(None) => return Err(Error::ServerExited),
            Ok(Some(message)) => message,
        };

        if message.is_ready() {
            self.port = message.port;
            return Ok(false);
        }

        match message.rules {
            Some(rules) => {
                self.rules = rules;
                Ok(true)
            }
            None => {
                tracing::warn!("ignoring unexpected message from stub server: {:?}", message);
                Ok(false)
            }
        }
    }
}
