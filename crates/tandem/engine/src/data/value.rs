//! Value data: a replicated scalar vector broadcast from its provider role.

use crate::{EngineError, EngineResult};
use std::sync::Arc;
use tandem_fabric::{ProcessGroup, ReduceOp};
use tandem_types::Layout;

/// A replicated scalar vector. One provider role broadcasts; multiple
/// provider roles have their contributions summed first, the engine's one
/// automatic aggregation rule.
pub struct SharedValue {
    name: String,
    providers: Vec<String>,
    local_role_name: String,
    local: Arc<dyn ProcessGroup>,
    global: Arc<dyn ProcessGroup>,
    dynamic: bool,
    context: String,
    data: Vec<f64>,
}

impl SharedValue {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        providers: Vec<String>,
        local_role_name: impl Into<String>,
        local: Arc<dyn ProcessGroup>,
        global: Arc<dyn ProcessGroup>,
        size: usize,
        dynamic: bool,
    ) -> Self {
        Self {
            name: name.into(),
            providers,
            local_role_name: local_role_name.into(),
            local,
            global,
            dynamic,
            context: String::new(),
            data: vec![0.0; size],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> Layout {
        Layout::Scalar
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub fn set_data(&mut self, values: &[f64]) -> EngineResult<()> {
        if self.dynamic {
            self.data = values.to_vec();
            return Ok(());
        }
        if values.len() != self.data.len() {
            return Err(EngineError::Logic(format!(
                "value '{}' has fixed size {}, got {} values",
                self.name,
                self.data.len(),
                values.len()
            )));
        }
        self.data.copy_from_slice(values);
        Ok(())
    }

    pub fn get_data(&self) -> Vec<f64> {
        self.data.clone()
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn set_context(&mut self, context: impl Into<String>) {
        self.context = context.into();
    }

    /// Replicate the provider's vector onto every process of the global
    /// group. The providing process is never known statically: the
    /// provider role's local rank 0 is discovered with a max-reduce over
    /// candidate global ranks, non-candidates contributing -1.
    pub fn transmit(&mut self) -> EngineResult<()> {
        if self.providers.len() == 1 {
            self.transmit_single_provider()
        } else {
            self.transmit_multi_provider()
        }
    }

    fn discover_sender(&self, candidate: bool) -> EngineResult<usize> {
        let mine = if candidate {
            self.global.rank() as i64
        } else {
            -1
        };
        let sender = self.global.all_reduce_i64(&[mine], ReduceOp::Max)?[0];
        if sender < 0 {
            return Err(EngineError::Logic(format!(
                "value '{}' has no provider present in the job",
                self.name
            )));
        }
        Ok(sender as usize)
    }

    fn transmit_single_provider(&mut self) -> EngineResult<()> {
        let is_provider = self.local_role_name == self.providers[0];
        let sender = self.discover_sender(is_provider && self.local.rank() == 0)?;

        if self.dynamic {
            let mut length = vec![self.data.len() as i64];
            self.global.broadcast_i64(&mut length, sender)?;
            self.data.resize(length[0] as usize, 0.0);
        }

        let mut received = self.data.clone();
        self.global.broadcast_f64(&mut received, sender)?;
        if !is_provider {
            self.data = received;
        }
        Ok(())
    }

    fn transmit_multi_provider(&mut self) -> EngineResult<()> {
        let is_provider = self.providers.contains(&self.local_role_name);

        // Gather each provider role's local rank 0 into a temporary group
        // and sum their vectors onto its rank 0.
        let color = i64::from(is_provider && self.local.rank() == 0);
        let reduction = self.global.split(color, self.global.rank() as i64)?;
        let reduced = reduction.reduce_f64(&self.data, ReduceOp::Sum, 0)?;

        let sender = self.discover_sender(color == 1 && reduction.rank() == 0)?;

        let mut received = reduced.unwrap_or_else(|| self.data.clone());
        self.global.broadcast_f64(&mut received, sender)?;
        if !is_provider {
            self.data = received;
        }
        Ok(())
    }
}
