use time::OffsetDateTime;

use crate::db::{Param, StorageError, Store};

use super::repo_types::{Contact, ContactFields};

const SELECT_CONTACT: &str = r#"
    SELECT id, firstname, lastname, email, homephone, mobile, address, birthday,
           created_at, updated_at
    FROM contacts
"#;

fn field_params(fields: &ContactFields) -> Vec<Param> {
    vec![
        fields.firstname.clone().into(),
        fields.lastname.clone().into(),
        fields.email.clone().into(),
        fields.homephone.clone().into(),
        fields.mobile.clone().into(),
        fields.address.clone().into(),
        fields.birthday.clone().into(),
    ]
}

impl Contact {
    /// All contacts ordered by last name, then first name.
    pub async fn list(store: &Store) -> Result<Vec<Contact>, StorageError> {
        let sql = format!("{SELECT_CONTACT} ORDER BY lastname, firstname");
        store.query_all(&sql, &[]).await
    }

    pub async fn find(store: &Store, id: i64) -> Result<Option<Contact>, StorageError> {
        let sql = format!("{SELECT_CONTACT} WHERE id = ?");
        store.query_one(&sql, &[Param::Int(id)]).await
    }

    /// Inserts a row and returns it as stored.
    pub async fn create(store: &Store, fields: &ContactFields) -> Result<Contact, StorageError> {
        let now = OffsetDateTime::now_utc();
        let mut params = field_params(fields);
        params.extend([Param::from(now), Param::from(now)]);

        let outcome = store
            .execute(
                r#"
                INSERT INTO contacts
                    (firstname, lastname, email, homephone, mobile, address, birthday, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
                &params,
            )
            .await?;

        Self::find(store, outcome.last_insert_id)
            .await?
            .ok_or(StorageError(sqlx::Error::RowNotFound))
    }

    /// Overwrites every mutable field in one conditional statement.
    /// Returns `None` when no row has this id.
    pub async fn update(store: &Store, id: i64, fields: &ContactFields) -> Result<Option<Contact>, StorageError> {
        let mut params = field_params(fields);
        params.extend([Param::from(OffsetDateTime::now_utc()), Param::Int(id)]);

        let outcome = store
            .execute(
                r#"
                UPDATE contacts
                SET firstname = ?, lastname = ?, email = ?,
                    homephone = ?, mobile = ?, address = ?,
                    birthday = ?, updated_at = ?
                WHERE id = ?
                "#,
                &params,
            )
            .await?;
        if outcome.rows_affected == 0 {
            return Ok(None);
        }

        Self::find(store, id).await
    }

    /// Returns whether a row was deleted.
    pub async fn delete(store: &Store, id: i64) -> Result<bool, StorageError> {
        let outcome = store
            .execute("DELETE FROM contacts WHERE id = ?", &[Param::Int(id)])
            .await?;
        Ok(outcome.rows_affected > 0)
    }
}
