use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Weak};

use parking_lot::Mutex;

use crate::key::{KeyInner, Target};

static INTERNED: LazyLock<Mutex<HashMap<Target, Weak<KeyInner>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Returns the canonical unconstrained key data for `target`, creating it if
/// nobody holds it anymore.
pub(super) fn intern(target: Target) -> Arc<KeyInner> {
    let mut table = INTERNED.lock();
    if let Some(inner) = table.get(&target).and_then(Weak::upgrade) {
        return inner;
    }

    table.retain(|_, inner| inner.strong_count() > 0);
    let inner = Arc::new(KeyInner::bare(target.clone()));
    table.insert(target, Arc::downgrade(&inner));
    inner
}
