use crate::registry::{StagedResponse, StreamRegistry};
use log::debug;
use savebridge_rpc::Location;

#[derive(Debug)]
pub enum FetchOutcome {
    /// Answer the request with the staged response.
    Respond(StagedResponse),
    /// Not ours; let the request go to the network.
    Passthrough,
}

impl FetchOutcome {
    pub fn into_response(self) -> Option<StagedResponse> {
        match self {
            Self::Respond(response) => Some(response),
            Self::Passthrough => None,
        }
    }
}

/// Fetch hook of the worker: consults the registry before passthrough.
#[derive(Clone, Debug)]
pub struct FetchInterceptor {
    registry: StreamRegistry,
}

impl FetchInterceptor {
    pub fn new(registry: StreamRegistry) -> Self {
        Self { registry }
    }

    pub fn on_fetch(&self, request_url: &Location) -> FetchOutcome {
        match self.registry.lookup(request_url) {
            Some(response) => {
                debug!("serving staged stream for {request_url}");
                FetchOutcome::Respond(response)
            }
            None => FetchOutcome::Passthrough,
        }
    }
}
