use std::sync::Arc;

use crate::interfaces::HostEnv;
use crate::types::KeyResultCode;

/// Reports per-key outcomes of batch operations through the host finish
/// stream as `(key bytes, single code byte)` pairs. Soft failures travel
/// here so the surrounding handler can keep processing the batch.
pub struct KeyEventSink {
    host: Arc<dyn HostEnv>,
}

impl KeyEventSink {
    pub fn new(host: Arc<dyn HostEnv>) -> Self {
        Self { host }
    }

    pub fn emit(&self, bls_key: &[u8], code: KeyResultCode) {
        self.host.finish(bls_key);
        self.host.finish(&[code.as_byte()]);
    }
}
