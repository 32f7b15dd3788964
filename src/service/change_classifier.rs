use tracing::warn;

use crate::models::{ChangeEvent, DiffEntry, RawDiff};

/// Turn a raw snapshot diff into typed change events.
///
/// Whole proposals appearing or vanishing become `Added` / `Removed`;
/// every other difference, nested or not, becomes `Changed` with its full
/// path. Output order is removals, additions, then changes, each sorted by
/// proposal id and then path.
pub fn classify(diff: RawDiff) -> Vec<ChangeEvent> {
    let mut events = Vec::with_capacity(diff.len());

    for entry in diff.removed {
        match top_level_id(&entry) {
            Some(TopLevel::Proposal(id)) => events.push(ChangeEvent::Removed { proposal_id: id }),
            Some(TopLevel::Nested(id)) => events.push(changed(id, entry)),
            None => skip(&entry),
        }
    }

    for entry in diff.added {
        match top_level_id(&entry) {
            Some(TopLevel::Proposal(id)) => events.push(ChangeEvent::Added { proposal_id: id }),
            Some(TopLevel::Nested(id)) => events.push(changed(id, entry)),
            None => skip(&entry),
        }
    }

    for entry in diff.changed {
        match entry.path.proposal_id() {
            Some(id) => events.push(changed(id, entry)),
            None => skip(&entry),
        }
    }

    events.sort_by(|a, b| {
        a.rank()
            .cmp(&b.rank())
            .then_with(|| a.proposal_id().cmp(&b.proposal_id()))
            .then_with(|| path_of(a).cmp(&path_of(b)))
    });
    events
}

enum TopLevel {
    Proposal(u64),
    Nested(u64),
}

fn top_level_id(entry: &DiffEntry) -> Option<TopLevel> {
    let id = entry.path.proposal_id()?;
    if entry.path.len() == 1 {
        Some(TopLevel::Proposal(id))
    } else {
        Some(TopLevel::Nested(id))
    }
}

fn changed(proposal_id: u64, entry: DiffEntry) -> ChangeEvent {
    ChangeEvent::Changed {
        proposal_id,
        field_path: entry.path,
        old_value: entry.old,
        new_value: entry.new,
    }
}

fn path_of(event: &ChangeEvent) -> Option<&crate::models::FieldPath> {
    match event {
        ChangeEvent::Changed { field_path, .. } => Some(field_path),
        _ => None,
    }
}

fn skip(entry: &DiffEntry) {
    warn!(path = %entry.path, "Skipping snapshot key that is not a proposal id");
}
