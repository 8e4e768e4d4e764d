//! Process-wide interning of dictionary type descriptors.
//!
//! Exactly one `DictType` exists per (key type, value type) identity
//! pair, so type identity checks reduce to pointer comparison. Entries are
//! never removed; every registered descriptor lives for the rest of the
//! process, which also keeps the element-type addresses used as keys from
//! being reused.

use std::sync::{Arc, OnceLock};

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::cfg::trace;
use crate::dict_type::DictType;
use crate::element::{type_identity, TypeRef};

type TypePair = (usize, usize);

fn registry() -> &'static Mutex<HashMap<TypePair, Arc<DictType>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<TypePair, Arc<DictType>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// The canonical descriptor for `Dict(key->value)`, creating it on first
/// request.
pub(crate) fn make(key: TypeRef, value: TypeRef) -> Arc<DictType> {
    let lookup_key = (type_identity(&key), type_identity(&value));

    let mut types = registry().lock();
    types
        .entry(lookup_key)
        .or_insert_with(|| {
            let ty = Arc::new(DictType::new(key, value));
            trace!(name = ty.type_name(), "registered dict type");
            ty
        })
        .clone()
}

/// Number of distinct dictionary types created so far.
pub(crate) fn registered() -> usize {
    registry().lock().len()
}
