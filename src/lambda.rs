use anyhow::{Context, Result};
use aws_sdk_lambda::{operation::invoke::InvokeOutput, primitives::Blob, Client};
use log::trace;
use serde::Serialize;

/// Lambda function invocation.
#[derive(Clone)]
pub struct Lambda {
    client: Client,
}

impl Lambda {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Invokes a function synchronously with `request` serialized to JSON as
    /// payload and returns the raw output.
    ///
    /// A function error is not an error here; check `InvokeOutput::function_error`.
    pub async fn invoke<T>(&self, function_name: &str, request: &T) -> Result<InvokeOutput>
    where T: Serialize + ?Sized
    {
        let payload = serde_json::to_vec(request)
            .with_context(|| format!("can't marshal lambda {function_name} request"))?;

        trace!("invoking lambda {function_name} with {} bytes payload", payload.len());
        self.client
            .invoke()
            .function_name(function_name)
            .payload(Blob::new(payload))
            .send()
            .await
            .with_context(|| format!("error calling lambda {function_name}"))
    }
}
