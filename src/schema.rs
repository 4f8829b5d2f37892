//! Handwritten Diesel schema for the history store.
//!
//! The tables are created by `db::store::ReadingStore::open` when the store
//! file does not exist yet; there is no migration metadata table.

diesel::table! {
    weather (id) {
        id -> BigInt,
        date -> Text,
        temperature -> Double,
    }
}

diesel::table! {
    readings (id) {
        id -> BigInt,
        date -> Text,
        temperature -> Double,
        token -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(weather, readings);
