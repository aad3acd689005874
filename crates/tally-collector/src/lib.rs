//! Input plugins for the tally agent.
//!
//! Each configured [`Instance`] pulls from one external source on its own
//! tick and pushes normalized samples into a [`SampleList`]. Instances are
//! built from configuration by the [`plugin::InputPlugin`] registered under
//! the input's name in a [`plugin::InputRegistry`].

pub mod error;
pub mod fanout;
pub mod github;
pub mod mtail;
pub mod normalize;
pub mod plugin;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tally_common::SampleList;

/// A configured input that gathers samples once per tick.
///
/// The agent calls [`Instance::init`] once before the first tick and
/// [`Instance::shutdown`] when the instance is removed. Gathering never
/// fails as a whole: problems are logged and the tick simply carries fewer
/// samples.
#[async_trait]
pub trait Instance: Send + Sync {
    /// Returns the name of the plugin that built this instance (e.g.
    /// `"mtail"`), used for logging.
    fn plugin(&self) -> &str;

    /// Per-instance tick override; `None` uses the agent default.
    fn interval(&self) -> Option<Duration>;

    /// Acquires the instance's long-lived resources. Calling it again
    /// releases the previous ones first.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot produce a usable source.
    fn init(&mut self) -> Result<()>;

    /// Runs one collection cycle, appending samples to `slist`.
    async fn gather(&self, slist: &SampleList);

    /// Releases everything acquired by [`Instance::init`].
    fn shutdown(&mut self);
}
