//! Row normalization

use recsink_common::types::{CanonicalRecord, RawRow, ID_FIELD};
use uuid::Uuid;

/// Map one raw row to its canonical record.
///
/// Any `id` the source supplied is dropped and a fresh random (v4) UUID takes
/// its place, so input can never choose or overwrite a store key. `name` and
/// `email` are copied as-is.
pub fn transform(mut raw: RawRow) -> CanonicalRecord {
    raw.remove(ID_FIELD);

    CanonicalRecord {
        id: Uuid::new_v4(),
        name: raw.name().map(str::to_owned),
        email: raw.email().map(str::to_owned),
    }
}
