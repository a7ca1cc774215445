pub(crate) mod spinlock;
