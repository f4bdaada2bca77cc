use crate::group::GroupSpec;

/// Split `0..total_shards` into contiguous groups of at most `per_group`
/// shards. The last group takes the remainder.
pub fn partition(total_shards: u32, per_group: u32) -> Vec<GroupSpec> {
    let per_group = per_group.max(1);
    let groups = total_shards.div_ceil(per_group);

    (0..groups)
        .map(|group_id| {
            let start = group_id * per_group;
            let end = (start + per_group).min(total_shards);
            GroupSpec::new(group_id, start..end, total_shards)
        })
        .collect()
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
