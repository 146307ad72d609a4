// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::convert::TryInto;

use cid::Cid;
use fil_actors_runtime::{actor_error, ActorContext, ActorError, Array};
use fvm_ipld_bitfield::BitField;
use fvm_ipld_blockstore::Blockstore;
use fvm_shared::clock::{ChainEpoch, QuantSpec};
use itertools::Itertools;

/// Bit width of the AMTs backing epoch-keyed queues.
pub const QUEUE_AMT_BIT_WIDTH: u32 = 6;

/// Wrapper for working with an AMT[ChainEpoch]*Bitfield functioning as a queue, bucketed by epoch.
/// Keys in the queue are quantized (upwards), modulo some offset, to reduce the cardinality of keys.
pub struct BitFieldQueue<BS: Blockstore> {
    pub amt: Array<BS, BitField>,
    quant: QuantSpec,
}

impl<BS: Blockstore> BitFieldQueue<BS> {
    pub fn new(store: BS, root: &Cid, quant: QuantSpec) -> Result<Self, ActorError> {
        Ok(Self { amt: Array::load(store, root, "bitfield queue")?, quant })
    }

    pub fn flush(&mut self) -> Result<Cid, ActorError> {
        self.amt.flush()
    }

    /// Adds values to the queue entry for an epoch.
    pub fn add_to_queue(
        &mut self,
        raw_epoch: ChainEpoch,
        values: &BitField,
    ) -> Result<(), ActorError> {
        if values.is_empty() {
            // nothing to do.
            return Ok(());
        }

        let epoch: u64 = self
            .quant
            .quantize_up(raw_epoch)
            .try_into()
            .map_err(|_| actor_error!(illegal_argument; "negative queue epoch {}", raw_epoch))?;

        let bitfield = self
            .amt
            .get(epoch)
            .with_context(|| format!("failed to lookup queue epoch {}", epoch))?
            .cloned()
            .unwrap_or_default();

        self.amt
            .set(epoch, &bitfield | values)
            .with_context(|| format!("failed to set queue epoch {}", epoch))?;

        Ok(())
    }

    pub fn add_to_queue_values(
        &mut self,
        epoch: ChainEpoch,
        values: impl IntoIterator<Item = u64>,
    ) -> Result<(), ActorError> {
        let bf = BitField::try_from_bits(values)
            .map_err(|e| actor_error!(illegal_argument; "invalid queue values: {}", e))?;
        self.add_to_queue(epoch, &bf)
    }

    pub fn add_many_to_queue_values(
        &mut self,
        values: impl IntoIterator<Item = (ChainEpoch, u64)>,
    ) -> Result<(), ActorError> {
        // Pre-quantize to reduce the number of updates.
        let mut quantized_values: Vec<_> = values
            .into_iter()
            .map(|(raw_epoch, value)| (self.quant.quantize_up(raw_epoch), value))
            .collect();

        // Sort and dedup.
        quantized_values.sort_unstable();
        quantized_values.dedup();

        // Add to queue.
        let mut iter = quantized_values.into_iter().peekable();
        while let Some(&(epoch, _)) = iter.peek() {
            self.add_to_queue_values(
                epoch,
                iter.peeking_take_while(|&(e, _)| e == epoch).map(|(_, v)| v),
            )?;
        }

        Ok(())
    }

    /// Removes the given values from every entry, deleting any entry left empty.
    /// Unlike a cut, remaining values keep their numbers.
    pub fn remove_values(&mut self, to_remove: &BitField) -> Result<(), ActorError> {
        if to_remove.is_empty() {
            return Ok(());
        }

        let mut updated = Vec::<(u64, BitField)>::new();
        let mut emptied = Vec::<u64>::new();
        self.amt
            .for_each(|epoch, bitfield| {
                let bf = bitfield - to_remove;
                if bf.is_empty() {
                    emptied.push(epoch);
                } else if bf.len() != bitfield.len() {
                    updated.push((epoch, bf));
                }
                Ok(())
            })
            .context("failed to remove values from bitfield queue")?;

        for (epoch, bf) in updated {
            self.amt.set(epoch, bf)?;
        }
        self.amt
            .batch_delete(emptied, true)
            .context("failed to remove empty epochs from bitfield queue")?;

        Ok(())
    }

    /// Removes and returns all values with keys less than or equal to until.
    /// Modified return value indicates whether this structure has been changed by the call.
    pub fn pop_until(&mut self, until: ChainEpoch) -> Result<(BitField, bool), ActorError> {
        let mut popped_values = BitField::new();
        let mut popped_keys = Vec::<u64>::new();

        self.amt.for_each_while(|epoch, bitfield| {
            if epoch as ChainEpoch > until {
                // break
                return Ok(false);
            }

            popped_keys.push(epoch);
            popped_values |= bitfield;
            Ok(true)
        })?;

        if popped_keys.is_empty() {
            // Nothing expired.
            return Ok((BitField::new(), false));
        }

        self.amt.batch_delete(popped_keys, true)?;
        Ok((popped_values, true))
    }

    /// Returns every value in the queue, across all epochs.
    pub fn all_values(&self) -> Result<BitField, ActorError> {
        let mut all = BitField::new();
        self.amt.for_each(|_, bitfield| {
            all |= bitfield;
            Ok(())
        })?;
        Ok(all)
    }
}
