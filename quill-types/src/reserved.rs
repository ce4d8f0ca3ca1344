//! Reserved value ranges for system use.
//!
//! This module centralizes the "magic numbers" that partition identifier
//! spaces, so no other crate hard-codes them and accidental collisions with
//! user-visible values are impossible.
//!
//! # Design Philosophy
//!
//! - **Use values near the unsigned maximum for sentinels** (`TXN_ID_NONE`).
//! - **Partition, don't tag**: committed and transaction-local row ids share
//!   one `u64` space split at [`MAX_ROW_ID`], so a bare row id always tells
//!   which side it belongs to. The index layer relies on this.
//! - **Always validate at the boundary**: helpers here are the only place
//!   that interprets raw ids.

use crate::ids::{RowId, TxnId};

// =============================================================================
// ROW ID PARTITION
// =============================================================================

/// Boundary between committed and transaction-local row identifiers.
///
/// Row ids strictly below `MAX_ROW_ID` are committed identifiers assigned by
/// the base table's append path. Ids at or above it are staged identifiers
/// assigned densely by a transaction's staging collection, starting exactly
/// at `MAX_ROW_ID`. The shadow-index layer depends on this disjointness to
/// tell staged rows from committed ones, which makes the constant an ABI
/// contract rather than a tunable.
pub const MAX_ROW_ID: RowId = 1 << 62;

/// Check whether a row id addresses a transaction-local staged row.
#[inline]
pub fn is_local_row_id(id: RowId) -> bool {
    id >= MAX_ROW_ID
}

/// Offset of a staged row within its staging collection.
///
/// Only meaningful when [`is_local_row_id`] holds for `id`.
#[inline]
pub fn local_row_offset(id: RowId) -> u64 {
    debug_assert!(is_local_row_id(id));
    id - MAX_ROW_ID
}

/// Staged row id for the row at `offset` in a staging collection.
#[inline]
pub fn local_row_id(offset: u64) -> RowId {
    MAX_ROW_ID + offset
}

// =============================================================================
// TRANSACTION ID RESERVATIONS
// =============================================================================

/// Transaction ID representing "no transaction".
///
/// Uses `u64::MAX` to avoid collision with real transaction ids.
pub const TXN_ID_NONE: TxnId = TxnId::MAX;

/// First transaction id handed out by the transaction manager.
pub const FIRST_TXN_ID: TxnId = 1;

/// Check if a transaction ID is reserved (cannot be allocated).
#[inline]
pub fn is_reserved_txn_id(id: TxnId) -> bool {
    id == TXN_ID_NONE || id < FIRST_TXN_ID
}

/// Return the error message for attempting to use a reserved transaction ID.
#[inline]
pub fn reserved_txn_id_message(id: TxnId) -> String {
    match id {
        TXN_ID_NONE => format!("Transaction ID {} (u64::MAX) is reserved for TXN_ID_NONE", id),
        0 => "Transaction ID 0 is invalid".to_string(),
        _ => format!("Transaction ID {} is reserved", id),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_id_partition() {
        assert!(!is_local_row_id(0));
        assert!(!is_local_row_id(MAX_ROW_ID - 1));
        assert!(is_local_row_id(MAX_ROW_ID));
        assert!(is_local_row_id(MAX_ROW_ID + 42));
    }

    #[test]
    fn test_local_row_id_round_trip() {
        for offset in [0u64, 1, 8191, 8192, 1 << 20] {
            let id = local_row_id(offset);
            assert!(is_local_row_id(id));
            assert_eq!(local_row_offset(id), offset);
        }
    }

    #[test]
    fn test_max_row_id_below_signed_maximum() {
        // The partition constant must stay representable as a positive i64.
        assert!(MAX_ROW_ID < i64::MAX as u64);
    }

    #[test]
    fn test_txn_id_reservations() {
        assert!(is_reserved_txn_id(TXN_ID_NONE));
        assert!(is_reserved_txn_id(0));
        assert!(!is_reserved_txn_id(FIRST_TXN_ID));
        assert!(!is_reserved_txn_id(100));
    }
}
