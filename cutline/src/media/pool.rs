use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::foundation::error::{CutlineError, CutlineResult};
use crate::media::source::{DecodeRequest, Decoded, MediaSource, SourceOpener};
use crate::project::asset::{Asset, AssetId};

/// Pool of decode cursors with exclusive checkout.
///
/// A decode cursor is stateful (seek position, caches), so concurrent users
/// must never share one. `checkout` hands out an idle cursor for the asset or
/// opens a fresh one; the lease returns it on drop. Concurrent checkouts of
/// the same asset therefore each hold their own cursor.
pub struct DecoderPool {
    opener: Arc<dyn SourceOpener>,
    idle: Mutex<HashMap<AssetId, Vec<Box<dyn MediaSource>>>>,
}

impl DecoderPool {
    pub fn new(opener: Arc<dyn SourceOpener>) -> Self {
        Self {
            opener,
            idle: Mutex::new(HashMap::new()),
        }
    }

    /// Check out an exclusive decode cursor for `asset`.
    pub fn checkout(&self, asset: &Asset) -> CutlineResult<SourceLease<'_>> {
        let source = match self.lock().get_mut(&asset.id).and_then(Vec::pop) {
            Some(idle) => idle,
            None => self.opener.open(asset).map_err(|e| {
                CutlineError::decode(format!("open decoder for asset {}: {e}", asset.id.0))
            })?,
        };
        Ok(SourceLease {
            pool: self,
            asset: asset.id,
            source: Some(source),
        })
    }

    /// Number of idle cursors currently pooled for `asset`.
    pub fn idle_count(&self, asset: AssetId) -> usize {
        self.lock().get(&asset).map_or(0, Vec::len)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<AssetId, Vec<Box<dyn MediaSource>>>> {
        match self.idle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn check_in(&self, asset: AssetId, source: Box<dyn MediaSource>) {
        self.lock().entry(asset).or_default().push(source);
    }
}

/// Exclusive lease on a decode cursor; checked back in on drop.
pub struct SourceLease<'a> {
    pool: &'a DecoderPool,
    asset: AssetId,
    source: Option<Box<dyn MediaSource>>,
}

impl SourceLease<'_> {
    /// Decode through the leased cursor.
    pub fn decode_at(&mut self, request: DecodeRequest) -> CutlineResult<Decoded> {
        match self.source.as_deref_mut() {
            Some(source) => source.decode_at(request),
            None => Err(CutlineError::decode("decoder lease already released")),
        }
    }
}

impl Drop for SourceLease<'_> {
    fn drop(&mut self) {
        if let Some(source) = self.source.take() {
            self.pool.check_in(self.asset, source);
        }
    }
}
