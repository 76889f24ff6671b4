//! Participant, account, limit and proxy operations for the repository.

use crate::domain::{AccountId, Currency, Decimal, Participant, ParticipantAccount, ParticipantName, TimeMs};
use sqlx::Row;

use super::Repository;

impl Repository {
    /// Register a participant.
    ///
    /// # Errors
    /// Returns an error if the name is taken or the insert fails.
    pub async fn create_participant(
        &self,
        name: &ParticipantName,
        is_proxy: bool,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO participant (name, is_active, is_proxy, created_at)
            VALUES (?, 1, ?, ?)
            "#,
        )
        .bind(name.as_str())
        .bind(is_proxy as i32)
        .bind(TimeMs::now().as_i64())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Open a POSITION account with a zero position and the given net debit cap.
    ///
    /// # Errors
    /// Returns an error if the participant does not exist or the account already exists.
    pub async fn create_position_account(
        &self,
        name: &ParticipantName,
        currency: &Currency,
        net_debit_cap: Decimal,
    ) -> Result<AccountId, sqlx::Error> {
        let now = TimeMs::now().as_i64();
        let mut tx = self.pool.begin().await?;

        let participant_id: i64 =
            sqlx::query("SELECT participant_id FROM participant WHERE name = ?")
                .bind(name.as_str())
                .fetch_one(&mut *tx)
                .await?
                .get("participant_id");

        let account_id = sqlx::query(
            r#"
            INSERT INTO participant_currency (participant_id, currency_id, ledger_account_type, is_active, created_at)
            VALUES (?, ?, 'POSITION', 1, ?)
            "#,
        )
        .bind(participant_id)
        .bind(currency.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        sqlx::query(
            r#"
            INSERT INTO participant_position (participant_currency_id, value, reserved_value, changed_at)
            VALUES (?, '0', '0', ?)
            "#,
        )
        .bind(account_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO participant_limit (participant_currency_id, limit_type, value, is_active, created_at)
            VALUES (?, 'NET_DEBIT_CAP', ?, 1, ?)
            "#,
        )
        .bind(account_id)
        .bind(net_debit_cap.to_canonical_string())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(AccountId(account_id))
    }

    /// # Errors
    /// Returns an error if the update fails.
    pub async fn set_participant_active(
        &self,
        name: &ParticipantName,
        is_active: bool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE participant SET is_active = ? WHERE name = ?")
            .bind(is_active as i32)
            .bind(name.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the update fails.
    pub async fn set_account_active(
        &self,
        account_id: AccountId,
        is_active: bool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE participant_currency SET is_active = ? WHERE participant_currency_id = ?")
            .bind(is_active as i32)
            .bind(account_id.as_i64())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the update fails.
    pub async fn set_net_debit_cap(
        &self,
        account_id: AccountId,
        value: Decimal,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE participant_limit SET value = ?
            WHERE participant_currency_id = ? AND limit_type = 'NET_DEBIT_CAP'
            "#,
        )
        .bind(value.to_canonical_string())
        .bind(account_id.as_i64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record that `name` lives in another scheme and is reached through `proxy`.
    ///
    /// # Errors
    /// Returns an error if the proxy participant does not exist.
    pub async fn add_external_participant(
        &self,
        name: &ParticipantName,
        proxy: &ParticipantName,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO external_participant (name, proxy_participant_id, created_at)
            SELECT ?, participant_id, ? FROM participant WHERE name = ?
            "#,
        )
        .bind(name.as_str())
        .bind(TimeMs::now().as_i64())
        .bind(proxy.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_participant_by_name(
        &self,
        name: &ParticipantName,
    ) -> Result<Option<Participant>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT participant_id, name, is_active, is_proxy
            FROM participant
            WHERE name = ?
            "#,
        )
        .bind(name.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Participant {
            id: row.get("participant_id"),
            name: ParticipantName::new(row.get::<String, _>("name")),
            is_active: row.get::<i32, _>("is_active") != 0,
            is_proxy: row.get::<i32, _>("is_proxy") != 0,
        }))
    }

    /// POSITION account of a participant in a currency.
    ///
    /// `is_active` is false when either the account or its participant is inactive.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_account_by_name_and_currency(
        &self,
        name: &ParticipantName,
        currency: &Currency,
    ) -> Result<Option<ParticipantAccount>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT pc.participant_currency_id, p.name, pc.currency_id,
                   (pc.is_active AND p.is_active) AS is_active
            FROM participant_currency pc
            JOIN participant p ON p.participant_id = pc.participant_id
            WHERE p.name = ? AND pc.currency_id = ? AND pc.ledger_account_type = 'POSITION'
            "#,
        )
        .bind(name.as_str())
        .bind(currency.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| ParticipantAccount {
            account_id: AccountId(row.get("participant_currency_id")),
            participant_name: ParticipantName::new(row.get::<String, _>("name")),
            currency: Currency::new(row.get::<String, _>("currency_id")),
            is_active: row.get::<i64, _>("is_active") != 0,
        }))
    }

    /// Proxy participant representing an external participant, if `name` is external.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_external_participant_proxy(
        &self,
        name: &ParticipantName,
    ) -> Result<Option<ParticipantName>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT p.name
            FROM external_participant ep
            JOIN participant p ON p.participant_id = ep.proxy_participant_id
            WHERE ep.name = ?
            "#,
        )
        .bind(name.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| ParticipantName::new(row.get::<String, _>("name"))))
    }
}
