//! Scrubbing through a room's history.
//!
//! The bus log is the only history there is, so any past state is rebuilt
//! by replaying the log from its start and stopping at the wanted position.
//! Events past it are still received and counted, just not applied, and
//! that includes live events arriving afterwards.

use tracing::info;

use crate::{
    bus::{Bus, DeliverPolicy},
    engine::{render::RenderSink, SyncEngine},
    error::EngineResult,
};

impl<B: Bus, R: RenderSink> SyncEngine<B, R> {
    /// Rebuild the store as it was after the first `target` events of the
    /// room's retained log. Zero leaves it empty.
    ///
    /// The current session is torn down first. The engine keeps streaming
    /// afterwards, skipping everything past `target`, until the next
    /// `scrub_to` or [connect](SyncEngine::connect).
    pub async fn scrub_to(&mut self, target: u64) -> EngineResult<()> {
        info!("Scrubbing {} to position {}", self.session.topic(), target);
        self.disconnect().await;
        self.target = Some(target);
        let result = self.start_session(DeliverPolicy::All, Some(target)).await;
        if result.is_err() {
            self.target = None;
        }
        result
    }
}
