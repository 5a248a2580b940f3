//! A console event listener (spec §4.1 "Listeners"): prints every event
//! published on the bus so a demo run shows its own progress.

use async_trait::async_trait;
use wukong_foundation::{EventListener, WukongEvent};

pub struct ConsoleListener;

#[async_trait]
impl EventListener for ConsoleListener {
    fn name(&self) -> &str {
        "console"
    }

    async fn on_event(&self, event: &WukongEvent) -> Result<(), String> {
        tracing::info!(tag = %event.tag, data = %event.data, "event");
        Ok(())
    }
}
