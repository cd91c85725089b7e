use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tessera_core::transport::{ChannelFactory, DataChannel};
use tracing::info;

use crate::errors::{Result, TesseraError};

/// A fixed set of reusable remote-channel handles.
///
/// Every topic writer/reader draws one channel for its lifetime so that
/// independent streams get network-level isolation without each paying for
/// its own connection. Channels are shared by reference; the pool tracks
/// active leases per channel and hands out the least-loaded one.
#[derive(Debug)]
pub(crate) struct ConnectionPool {
    slots: Vec<PoolSlot>,
}

#[derive(Debug)]
struct PoolSlot {
    channel: Arc<dyn DataChannel>,
    active: Arc<AtomicUsize>,
}

impl ConnectionPool {
    /// Dials `size` channels up front through the factory.
    pub(crate) async fn connect(factory: &Arc<dyn ChannelFactory>, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(TesseraError::Validation(
                "connection pool size must be at least 1".to_string(),
            ));
        }
        let mut slots = Vec::with_capacity(size);
        for _ in 0..size {
            let channel = factory
                .connect()
                .await
                .map_err(|e| TesseraError::Connection(e.to_string()))?;
            slots.push(PoolSlot {
                channel,
                active: Arc::new(AtomicUsize::new(0)),
            });
        }
        info!(size, "connection pool established");
        Ok(ConnectionPool { slots })
    }

    /// Leases the least-loaded channel. The lease is returned exactly once,
    /// when the guard drops.
    pub(crate) fn lease(&self) -> ChannelLease {
        let slot = self
            .slots
            .iter()
            .min_by_key(|slot| slot.active.load(Ordering::SeqCst))
            .expect("pool holds at least one channel");
        slot.active.fetch_add(1, Ordering::SeqCst);
        ChannelLease {
            channel: slot.channel.clone(),
            active: slot.active.clone(),
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.slots.len()
    }

    /// Total leases currently out, across all channels.
    #[cfg(test)]
    pub(crate) fn active_leases(&self) -> usize {
        self.slots
            .iter()
            .map(|slot| slot.active.load(Ordering::SeqCst))
            .sum()
    }
}

/// Scoped access to one pooled channel; returns itself to the pool on drop.
#[derive(Debug)]
pub(crate) struct ChannelLease {
    channel: Arc<dyn DataChannel>,
    active: Arc<AtomicUsize>,
}

impl ChannelLease {
    pub(crate) fn channel(&self) -> &Arc<dyn DataChannel> {
        &self.channel
    }
}

impl Drop for ChannelLease {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}
