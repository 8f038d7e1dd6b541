//! Embedded padsync Example
//!
//! Two notepads on one document, sharing an in-process store and change
//! channel. No server needed.
//!
//! Run with: cargo run --example embedded

use std::sync::Arc;
use std::time::Duration;

use padsync_client::{Notepad, SessionEvent, SurfaceRect, SyncConfig};
use padsync_core::{ChannelHub, DocumentId, Participant, ParticipantId};
use padsync_storage::{MemoryStorage, NotifyingStorage, Storage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("padsync Embedded Example\n");

    let hub = Arc::new(ChannelHub::new());
    let store: Arc<dyn Storage> = Arc::new(NotifyingStorage::new(Arc::new(MemoryStorage::new()), hub.clone()));
    let config = SyncConfig::default().with_debounce(Duration::from_millis(200));

    let id = DocumentId::random();
    let alice = Participant::new(ParticipantId::new("alice")?, "Alice", "#e91e63");
    let bob = Participant::new(ParticipantId::new("bob")?, "Bob", "#2196f3");

    let pad_a = Notepad::open_as(id.clone(), store.clone(), hub.clone(), config.clone(), alice).await?;
    let pad_b = Notepad::open_as(id.clone(), store.clone(), hub.clone(), config, bob).await?;
    println!("Opened notepad {}", id);

    let mut b_events = pad_b.subscribe_events();

    // Alice types; only the last keystroke in the window is written
    for text in ["H", "He", "Hel", "Hell", "Hello from Alice"] {
        pad_a.edit(text);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    wait_for_remote(&mut b_events).await;
    println!("Bob sees: {:?}", pad_b.content());

    pad_b.edit("Bob was here");
    pad_b.session().flush().await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    println!("Alice sees: {:?}", pad_a.content());

    // Cursor traffic
    pad_a.cursors().pointer_moved(140.0, 80.0, SurfaceRect::new(100.0, 50.0));
    pad_a.cursors().flush_frame().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    for cursor in pad_b.cursors().cursors() {
        let p = &cursor.payload;
        println!("Bob sees {} at ({}, {})", p.display_name, p.x, p.y);
    }

    println!("\nStored: {:?}", store.read(&id).await?.map(|doc| doc.content));

    pad_a.close().await;
    pad_b.close().await;
    Ok(())
}

async fn wait_for_remote(events: &mut tokio::sync::broadcast::Receiver<SessionEvent>) {
    let wait = async {
        while let Ok(event) = events.recv().await {
            if matches!(event, SessionEvent::RemoteApplied { .. }) {
                break;
            }
        }
    };
    let _ = tokio::time::timeout(Duration::from_secs(2), wait).await;
}
