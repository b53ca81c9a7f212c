//! User wallet directory: where a user's rewards are sent

use diesel::prelude::*;

use super::diesel_schema::user_wallets;
use super::models::{current_timestamp, NewWallet, Wallet};
use crate::error::QuestError;

/// Insert or replace the wallet address for a user
pub fn set_wallet(
    conn: &mut SqliteConnection,
    user_id: &str,
    address: &str,
) -> Result<Wallet, QuestError> {
    let now = current_timestamp();
    let wallet = NewWallet {
        user_id,
        address,
        updated_at: &now,
    };

    diesel::insert_into(user_wallets::table)
        .values(&wallet)
        .on_conflict(user_wallets::user_id)
        .do_update()
        .set(&wallet)
        .execute(conn)?;

    get_wallet(conn, user_id)?
        .ok_or_else(|| QuestError::Internal("Failed to retrieve wallet".into()))
}

/// Get the wallet for a user
pub fn get_wallet(conn: &mut SqliteConnection, user_id: &str) -> Result<Option<Wallet>, QuestError> {
    Ok(user_wallets::table
        .filter(user_wallets::user_id.eq(user_id))
        .select(Wallet::as_select())
        .first(conn)
        .optional()?)
}
