//! The graph sink. Pulling it each block drives everything upstream.

use crate::error::Result;
use crate::node::{ProcessScope, Processor};

pub(crate) struct DestinationProcessor;

impl Processor for DestinationProcessor {
    fn process(&mut self, scope: &mut ProcessScope<'_>) -> Result<()> {
        let (inputs, mut outputs, _) = scope.parts();
        if let Some(input) = inputs.buffer(0) {
            if !input.is_silent() {
                outputs.buffer_mut(0).copy_from(input);
            }
        }
        Ok(())
    }
}
