//! Single-slot playback: at most one sound is loaded at a time.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::Result;

#[async_trait]
pub trait Player: Send + Sync {
    async fn load(&self, uri: &str) -> Result<Box<dyn Sound>>;
}

#[async_trait]
pub trait Sound: Send {
    async fn play(&mut self) -> Result<()>;
    async fn stop(&mut self) -> Result<()>;
    async fn unload(self: Box<Self>) -> Result<()>;
}

struct Loaded {
    uri: String,
    sound: Box<dyn Sound>,
}

/// Owns the one currently loaded sound and unloads it before loading another.
pub struct PlaybackSlot {
    player: Arc<dyn Player>,
    current: Mutex<Option<Loaded>>,
}

impl PlaybackSlot {
    pub fn new(player: Arc<dyn Player>) -> Self {
        Self {
            player,
            current: Mutex::new(None),
        }
    }

    pub async fn play(&self, uri: &str) -> Result<()> {
        let mut current = self.current.lock().await;
        if let Some(previous) = current.take() {
            Self::release(previous).await;
        }

        let mut sound = self.player.load(uri).await?;
        sound.play().await?;
        debug!("Playing {}", uri);
        *current = Some(Loaded {
            uri: uri.to_string(),
            sound,
        });
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        match self.current.lock().await.as_mut() {
            Some(loaded) => loaded.sound.stop().await,
            None => Ok(()),
        }
    }

    pub async fn unload(&self) {
        if let Some(previous) = self.current.lock().await.take() {
            Self::release(previous).await;
        }
    }

    pub async fn current_uri(&self) -> Option<String> {
        self.current.lock().await.as_ref().map(|l| l.uri.clone())
    }

    async fn release(loaded: Loaded) {
        if let Err(e) = loaded.sound.unload().await {
            warn!("Failed to unload {}: {}", loaded.uri, e);
        }
    }
}
