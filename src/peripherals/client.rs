//! # Payload controller client handle.
//!
//! [`ClientHandle`] is the per-invocation view of the [`PayloadClient`]: every call
//! checks that the invocation is still live, races the RPC against cancellation
//! and maps transport failures into [`PeripheralError::Client`].

use std::future::Future;
use std::sync::Arc;

use crate::error::PeripheralError;
use crate::peripherals::drivers::{ClientError, ClientResponse, Location, PayloadClient, PowerState};
use crate::peripherals::scope::InvocationScope;

/// Client access bound to one invocation.
#[derive(Clone)]
pub struct ClientHandle {
    client: Option<Arc<dyn PayloadClient>>,
    scope: InvocationScope,
}

impl ClientHandle {
    pub(crate) fn new(client: Option<Arc<dyn PayloadClient>>, scope: InvocationScope) -> Self {
        Self { client, scope }
    }

    fn client(&self) -> Result<&Arc<dyn PayloadClient>, PeripheralError> {
        self.scope.ensure_live()?;
        self.client
            .as_ref()
            .ok_or(PeripheralError::Unavailable { class: "client" })
    }

    async fn call<T>(
        &self,
        fut: impl Future<Output = Result<T, ClientError>>,
    ) -> Result<T, PeripheralError> {
        tokio::select! {
            biased;
            _ = self.scope.token().cancelled() => Err(PeripheralError::Cancelled),
            res = fut => res.map_err(|e| PeripheralError::Client { call: e.call, reason: e.reason }),
        }
    }

    pub async fn get_current_location(&self) -> Result<Location, PeripheralError> {
        let client = self.client()?;
        self.call(client.get_current_location()).await
    }

    pub async fn payload_power_control(
        &self,
        state: PowerState,
    ) -> Result<ClientResponse, PeripheralError> {
        let client = self.client()?;
        self.call(client.payload_power_control(state)).await
    }

    pub async fn stage_file_download(&self, filename: &str) -> Result<ClientResponse, PeripheralError> {
        let client = self.client()?;
        self.call(client.stage_file_download(filename)).await
    }
}
