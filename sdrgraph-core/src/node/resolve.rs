//! Local Resolution
//!
//! A node keeps its own properties consistent through resolvers: closures
//! that read a set of input properties and write a set of outputs. Local
//! resolution runs every resolver fed by a dirty property, in registration
//! order, and follows the outputs they dirty in turn.
//!
//! # Write Locking
//!
//! Within one pass, the first resolver to write a property opens it
//! read-write. Later resolvers get it locked: they may confirm the value, but
//! writing a different one is a resolve error, since two resolvers then
//! disagree about the same output.

use smallvec::SmallVec;
use tracing::{trace, warn};

use super::access::PropertyAccess;
use super::Node;
use crate::error::{GraphError, Result};
use crate::property::{AccessMode, PropHandle, PropertyValue};

pub(crate) type ResolverFn = Box<dyn FnMut(&mut PropertyAccess<'_>) -> Result<()> + Send>;

pub(crate) type CleanCallback = Box<dyn FnMut(&PropertyValue) + Send>;

pub(crate) struct Resolver {
    pub(crate) inputs: SmallVec<[usize; 4]>,
    pub(crate) outputs: SmallVec<[usize; 4]>,
    pub(crate) func: ResolverFn,
}

impl Node {
    /// Run every resolver once with its outputs locked, then clean.
    ///
    /// This reconciles the defaults a block registered. A resolver that
    /// computes a value different from an output's default fails, as does one
    /// that reads an input without a value.
    pub fn init_props(&mut self) -> Result<()> {
        for resolver in self.resolvers.iter_mut() {
            for &output in &resolver.outputs {
                self.props.set_access(output, AccessMode::ReadWriteLocked);
            }
            let result = (resolver.func)(&mut PropertyAccess::new(
                &self.unique_id,
                &mut self.props,
                &mut self.outbox,
            ));
            for &output in &resolver.outputs {
                self.props.set_access(output, AccessMode::ReadOnly);
            }
            if let Err(err) = result {
                warn!(node = %self.unique_id, error = %err, "failed to initialize node, most likely due to inconsistent default values");
                return Err(match err {
                    GraphError::Resolve(_) => err,
                    other => GraphError::Resolve(format!(
                        "failed to initialize {}: {other}",
                        self.unique_id
                    )),
                });
            }
        }
        self.clean_props();
        if !self.attached {
            self.outbox.clear();
        }
        Ok(())
    }

    /// Run the resolvers affected by dirty properties, following chains of
    /// outputs that become dirty along the way.
    ///
    /// Resolution proceeds in rounds. Each round runs, once each and in
    /// registration order, every resolver with an input in the round's dirty
    /// set. The outputs they leave dirty form the next round's set. A
    /// property feeds at most one round.
    pub(crate) fn resolve_props(&mut self) -> Result<()> {
        let mut frontier = self.props.dirty();
        let mut consumed = vec![false; self.props.len()];
        let mut written = vec![false; self.props.len()];
        trace!(node = %self.unique_id, dirty = frontier.len(), "locally resolving dirty properties");

        while !frontier.is_empty() {
            for &input in &frontier {
                consumed[input] = true;
            }
            let mut next = Vec::new();
            for resolver in self.resolvers.iter_mut() {
                if !resolver.inputs.iter().any(|input| frontier.contains(input)) {
                    continue;
                }
                for &output in &resolver.outputs {
                    let access = if written[output] {
                        AccessMode::ReadWriteLocked
                    } else {
                        AccessMode::ReadWrite
                    };
                    self.props.set_access(output, access);
                }
                let result = (resolver.func)(&mut PropertyAccess::new(
                    &self.unique_id,
                    &mut self.props,
                    &mut self.outbox,
                ));
                for &output in &resolver.outputs {
                    self.props.set_access(output, AccessMode::ReadOnly);
                }
                result?;

                for &output in &resolver.outputs {
                    written[output] = true;
                    let dirty = self.props.cell(output).is_some_and(|cell| cell.is_dirty());
                    if dirty && !consumed[output] && !next.contains(&output) {
                        next.push(output);
                    }
                }
            }
            frontier = next;
        }
        Ok(())
    }

    /// Mark every property clean and read-only. Clean callbacks fire for
    /// properties that held a value and were dirty.
    pub(crate) fn clean_props(&mut self) {
        for index in 0..self.props.len() {
            let Some(cell) = self.props.cell_mut(index) else {
                continue;
            };
            if cell.is_valid() && cell.is_dirty() {
                if let (Some(callback), Some(value)) =
                    (self.clean_callbacks.get_mut(&index), cell.value())
                {
                    callback(value);
                }
            }
            cell.mark_clean();
            cell.set_access(AccessMode::ReadOnly);
        }
    }

    pub(crate) fn add_forwarding_resolver(&mut self, from: PropHandle, to: PropHandle) {
        self.resolvers.push(Resolver {
            inputs: SmallVec::from_elem(from.0, 1),
            outputs: SmallVec::from_elem(to.0, 1),
            func: Box::new(move |access: &mut PropertyAccess<'_>| access.forward(from, to)),
        });
    }
}
