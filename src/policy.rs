/// When a reclaimed value's key leaves the map.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum ReclaimPolicy {
    /// Remove the key as soon as the last `Strong` is dropped. If the map is
    /// busy at that moment the request is queued and applied by the next
    /// map operation.
    #[default]
    Eager,
    /// Queue every removal request until `WeakValueMap::purge` runs. Dead
    /// entries stay counted by `len`/`keys` in the meantime, but reads never
    /// return them.
    Deferred,
}
