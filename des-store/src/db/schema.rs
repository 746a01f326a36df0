diesel::table! {
    des_archive_config (id) {
        id -> Int4,
        archived_until -> Timestamptz,
        lag_days -> Int4,
    }
}
