/// Advisory check for branch names given to `stash branch` or `checkout`.
/// git has the final say; this only lets callers refuse obvious typos early.
pub fn is_valid_branch_name(name: &str) -> bool {
    git2::Branch::name_is_valid(name).unwrap_or(false)
}
