//! Operation execution against one partition
//!
//! # Conditional Writes
//!
//! | Operation | Key absent | Present, version differs | Present, version matches |
//! |-----------|------------|--------------------------|--------------------------|
//! | Put | insert | overwrite | overwrite |
//! | PutIfAbsent | insert | no-op | no-op |
//! | PutIfPresent | no-op | overwrite | overwrite |
//! | PutIfVersion | no-op | no-op | overwrite |
//! | Delete | no-op, false | delete | delete |
//! | DeleteIfVersion | no-op, false | no-op, false | delete |
//!
//! A write that takes effect gets a fresh version. A no-op reports
//! `success = false` and no new version. Whenever the key existed before
//! the operation, the previous value and version are attached as the
//! operation's [`ReturnChoice`] asks, whether or not the write took effect.
//!
//! # Execute
//!
//! Batch members run in order against a [`WriteSet`], each seeing the
//! effects of the ones before it. The first member flagged
//! `abort_if_unsuccessful` that does not succeed discards the whole write
//! set. Otherwise the write set is applied in one step.

use shardline_core::{
    Direction, Error, Key, KeyValueVersion, KeyVersion, Result, ReturnChoice, Value,
    ValueVersion, Version,
};
use shardline_protocol::{
    BatchOperation, ExecuteOutcome, IterateSpec, MultiKeySpec, Operation, OperationResult,
    ScanBatch, ScanEntry, WriteResult,
};
use tracing::debug;

use crate::store::{PartitionStore, Record, VersionClock, WriteSet};

/// Run `operation` against `store`, issuing versions from `clock`
pub fn execute(
    store: &mut PartitionStore,
    operation: &Operation,
    clock: &VersionClock,
) -> Result<OperationResult> {
    match operation {
        Operation::Get { key, .. } => Ok(get(store, key)),

        Operation::Put { .. }
        | Operation::PutIfAbsent { .. }
        | Operation::PutIfPresent { .. }
        | Operation::PutIfVersion { .. }
        | Operation::Delete { .. }
        | Operation::DeleteIfVersion { .. } => {
            let (result, changes) = {
                let mut ws = WriteSet::new(store);
                let result = apply_write(&mut ws, operation, clock)?;
                (result, ws.into_changes())
            };
            store.apply(changes);
            Ok(result)
        }

        Operation::MultiGetKeys(spec) => Ok(OperationResult::MultiGetKeys(
            subtree(store, spec)
                .into_iter()
                .map(|r| KeyVersion {
                    key: r.key.clone(),
                    version: r.version,
                })
                .collect(),
        )),

        Operation::MultiGetValues(spec) => Ok(OperationResult::MultiGetValues(
            subtree(store, spec)
                .into_iter()
                .map(|r| KeyValueVersion {
                    key: r.key.clone(),
                    value: r.value.clone(),
                    version: r.version,
                })
                .collect(),
        )),

        Operation::MultiDelete(spec) => {
            let doomed: Vec<(Vec<u8>, Option<Record>)> = subtree(store, spec)
                .into_iter()
                .map(|r| (r.key.to_bytes(), None))
                .collect();
            let count = doomed.len() as u64;
            if count > 0 {
                store.apply(doomed);
                clock.issue();
            }
            Ok(OperationResult::MultiDelete(count))
        }

        Operation::Iterate(spec) => Ok(OperationResult::Iterate(scan(store, spec, None))),

        Operation::TableIterate { table_id, spec } => Ok(OperationResult::TableIterate(scan(
            store,
            spec,
            Some(*table_id),
        ))),

        Operation::Execute(ops) => execute_batch(store, ops, clock),
    }
}

fn get(store: &PartitionStore, key: &Key) -> OperationResult {
    match store.get(&key.to_bytes()) {
        Some(record) => OperationResult::Get {
            record: Some(ValueVersion::new(record.value.clone(), record.version)),
            table_id: record.table_id,
        },
        None => OperationResult::Get {
            record: None,
            table_id: None,
        },
    }
}

fn execute_batch(
    store: &mut PartitionStore,
    ops: &[BatchOperation],
    clock: &VersionClock,
) -> Result<OperationResult> {
    let (results, changes) = {
        let mut ws = WriteSet::new(store);
        let mut results = Vec::with_capacity(ops.len());
        for (index, batch_op) in ops.iter().enumerate() {
            let result = apply_write(&mut ws, &batch_op.operation, clock)?;
            if batch_op.abort_if_unsuccessful && !result.is_success() {
                debug!(
                    failed_index = index,
                    operation = result.variant_name(),
                    staged = ws.len(),
                    "Execute batch aborted"
                );
                return Ok(OperationResult::Execute(ExecuteOutcome::Aborted {
                    failed_index: index,
                    failed_result: Box::new(result),
                }));
            }
            results.push(result);
        }
        (results, ws.into_changes())
    };

    store.apply(changes);
    Ok(OperationResult::Execute(ExecuteOutcome::Committed(results)))
}

/// Stage one single-key write
fn apply_write(
    ws: &mut WriteSet<'_>,
    operation: &Operation,
    clock: &VersionClock,
) -> Result<OperationResult> {
    match operation {
        Operation::Put {
            key,
            value,
            return_choice,
            table_id,
        } => {
            let w = put_when(ws, clock, key, value, *return_choice, *table_id, |_| true);
            Ok(OperationResult::Put(w))
        }
        Operation::PutIfAbsent {
            key,
            value,
            return_choice,
            table_id,
        } => {
            let w = put_when(ws, clock, key, value, *return_choice, *table_id, |prior| {
                prior.is_none()
            });
            Ok(OperationResult::PutIfAbsent(w))
        }
        Operation::PutIfPresent {
            key,
            value,
            return_choice,
            table_id,
        } => {
            let w = put_when(ws, clock, key, value, *return_choice, *table_id, |prior| {
                prior.is_some()
            });
            Ok(OperationResult::PutIfPresent(w))
        }
        Operation::PutIfVersion {
            key,
            value,
            match_version,
            return_choice,
            table_id,
        } => {
            let w = put_when(ws, clock, key, value, *return_choice, *table_id, |prior| {
                version_matches(prior, match_version)
            });
            Ok(OperationResult::PutIfVersion(w))
        }
        Operation::Delete {
            key,
            return_choice,
            table_id,
        } => {
            let w = delete_when(ws, key, *return_choice, *table_id, |prior| prior.is_some());
            Ok(OperationResult::Delete(w))
        }
        Operation::DeleteIfVersion {
            key,
            match_version,
            return_choice,
            table_id,
        } => {
            let w = delete_when(ws, key, *return_choice, *table_id, |prior| {
                version_matches(prior, match_version)
            });
            Ok(OperationResult::DeleteIfVersion(w))
        }
        other => Err(Error::illegal_argument(format!(
            "{} is not a single-key write",
            other.opcode().name()
        ))),
    }
}

fn version_matches(prior: Option<&Record>, expected: &Version) -> bool {
    prior.map_or(false, |r| r.version == *expected)
}

fn put_when(
    ws: &mut WriteSet<'_>,
    clock: &VersionClock,
    key: &Key,
    value: &Value,
    return_choice: ReturnChoice,
    table_id: Option<u64>,
    condition: impl FnOnce(Option<&Record>) -> bool,
) -> WriteResult {
    let encoded = key.to_bytes();
    let prior = ws.current(&encoded).cloned();

    let mut result = if condition(prior.as_ref()) {
        let version = clock.issue();
        ws.put(
            encoded,
            Record {
                key: key.clone(),
                value: value.clone(),
                version,
                table_id,
            },
        );
        WriteResult::written(version)
    } else {
        WriteResult::unsuccessful()
    };
    result.table_id = table_id;
    with_previous(result, prior.as_ref(), return_choice)
}

fn delete_when(
    ws: &mut WriteSet<'_>,
    key: &Key,
    return_choice: ReturnChoice,
    table_id: Option<u64>,
    condition: impl FnOnce(Option<&Record>) -> bool,
) -> WriteResult {
    let encoded = key.to_bytes();
    let prior = ws.current(&encoded).cloned();

    let mut result = if condition(prior.as_ref()) {
        ws.remove(encoded);
        WriteResult::deleted()
    } else {
        WriteResult::unsuccessful()
    };
    result.table_id = table_id;
    with_previous(result, prior.as_ref(), return_choice)
}

fn with_previous(
    mut result: WriteResult,
    prior: Option<&Record>,
    return_choice: ReturnChoice,
) -> WriteResult {
    if let Some(prior) = prior {
        if return_choice.returns_value() {
            result.previous_value = Some(prior.value.clone());
        }
        if return_choice.returns_version() {
            result.previous_version = Some(prior.version);
        }
    }
    result
}

fn subtree<'a>(store: &'a PartitionStore, spec: &MultiKeySpec) -> Vec<&'a Record> {
    let prefix = spec.parent.to_bytes();
    store
        .scan_forward(&prefix, None)
        .filter(|r| spec.contains(&r.key))
        .collect()
}

fn scan(store: &PartitionStore, spec: &IterateSpec, table_id: Option<u64>) -> ScanBatch {
    let prefix = spec.parent.as_ref().map(Key::to_bytes).unwrap_or_default();
    let resume = spec.resume_key.as_ref().map(Key::to_bytes);
    let limit = spec.batch_size as usize;

    let in_scope = |r: &&Record| {
        spec.contains(&r.key) && table_id.map_or(true, |t| r.table_id == Some(t))
    };

    // One extra record tells us whether another batch exists
    let mut selected: Vec<&Record> = match spec.direction {
        Direction::Reverse => store
            .scan_reverse(&prefix, resume.as_deref())
            .filter(in_scope)
            .take(limit + 1)
            .collect(),
        Direction::Forward | Direction::Unordered => store
            .scan_forward(&prefix, resume.as_deref())
            .filter(in_scope)
            .take(limit + 1)
            .collect(),
    };

    let has_more = selected.len() > limit;
    selected.truncate(limit);

    ScanBatch {
        entries: selected
            .into_iter()
            .map(|r| ScanEntry {
                key: r.key.clone(),
                version: r.version,
                value: if spec.keys_only {
                    None
                } else {
                    Some(r.value.clone())
                },
            })
            .collect(),
        has_more,
    }
}
