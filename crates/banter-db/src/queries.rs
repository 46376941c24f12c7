use crate::Database;
use crate::error::StoreError;
use crate::models::{ChatRow, ChatSummaryRow, MessageRow, ParticipantRow, UserRow};
use rusqlite::{Connection, OptionalExtension, params};

/// Upper bound on group chat names, matching the original schema limit.
const MAX_GROUP_NAME_LEN: usize = 100;

impl Database {
    // -- Users --

    pub fn insert_user(
        &self,
        id: &str,
        username: &str,
        avatar_ref: &str,
        now: &str,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, avatar_ref, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![id, username, avatar_ref, now],
            )?;
            Ok(())
        })
    }

    pub fn get_user(&self, id: &str) -> Result<Option<UserRow>, StoreError> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    pub fn list_users(&self) -> Result<Vec<UserRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, avatar_ref, created_at FROM users ORDER BY username ASC",
            )?;
            let rows = stmt
                .query_map([], map_user_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn update_user_profile(
        &self,
        id: &str,
        username: &str,
        avatar_ref: &str,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE users SET username = ?2, avatar_ref = ?3 WHERE id = ?1",
                    params![id, username, avatar_ref],
                )
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        StoreError::InvalidArgument("username already taken")
                    } else {
                        e.into()
                    }
                })?;
            if changed == 0 {
                return Err(StoreError::UserNotFound);
            }
            Ok(())
        })
    }

    /// Users who share a direct chat with `user_id`. Group co-membership
    /// does not make someone a contact.
    pub fn list_contacts(&self, user_id: &str) -> Result<Vec<UserRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT u.id, u.username, u.avatar_ref, u.created_at
                 FROM users u
                 JOIN chat_participants op ON op.user_id = u.id
                 JOIN chats c ON c.id = op.chat_id AND c.is_group = 0
                 JOIN chat_participants me ON me.chat_id = c.id AND me.user_id = ?1
                 WHERE u.id <> ?1
                 ORDER BY u.username ASC",
            )?;
            let rows = stmt
                .query_map([user_id], map_user_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Chats --

    /// Create (or return the existing) direct chat for an unordered user
    /// pair. The partial unique index on the normalized (peer_lo, peer_hi)
    /// pair makes this race-safe: a loser of a concurrent create hits the
    /// constraint, rolls back, and re-reads the winner's chat.
    pub fn create_direct_chat(
        &self,
        id: &str,
        user_a: &str,
        user_b: &str,
        now: &str,
    ) -> Result<ChatRow, StoreError> {
        if user_a == user_b {
            return Err(StoreError::InvalidArgument(
                "cannot create a direct chat with yourself",
            ));
        }

        self.with_conn(|conn| {
            let (lo, hi) = if user_a < user_b {
                (user_a, user_b)
            } else {
                (user_b, user_a)
            };

            let tx = conn.unchecked_transaction()?;
            for uid in [user_a, user_b] {
                if !user_exists(&tx, uid)? {
                    return Err(StoreError::UserNotFound);
                }
            }

            let inserted = tx.execute(
                "INSERT INTO chats (id, is_group, name, description, avatar_ref, peer_lo, peer_hi, created_at, updated_at)
                 VALUES (?1, 0, '', '', '', ?2, ?3, ?4, ?4)",
                params![id, lo, hi, now],
            );

            match inserted {
                Ok(_) => {
                    for uid in [user_a, user_b] {
                        tx.execute(
                            "INSERT INTO chat_participants (chat_id, user_id, is_admin, joined_at)
                             VALUES (?1, ?2, 0, ?3)",
                            params![id, uid, now],
                        )?;
                    }
                    tx.commit()?;
                    query_chat_by_id(conn, id)?.ok_or(StoreError::ChatNotFound)
                }
                Err(e) if is_unique_violation(&e) => {
                    // Lost the creation race; the pair's chat already exists.
                    drop(tx);
                    query_direct_chat_by_pair(conn, lo, hi)?.ok_or(StoreError::ChatNotFound)
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Create a group chat. The creator is always a participant with the
    /// admin flag, duplicate participant ids are dropped silently.
    pub fn create_group_chat(
        &self,
        id: &str,
        creator_id: &str,
        name: &str,
        description: &str,
        avatar_ref: &str,
        participant_ids: &[String],
        now: &str,
    ) -> Result<ChatRow, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::InvalidArgument("group name must not be empty"));
        }
        if name.len() > MAX_GROUP_NAME_LEN {
            return Err(StoreError::InvalidArgument("group name too long"));
        }

        let mut members: Vec<&str> = Vec::new();
        for uid in participant_ids {
            if uid != creator_id && !members.contains(&uid.as_str()) {
                members.push(uid);
            }
        }
        if members.is_empty() {
            return Err(StoreError::InvalidArgument(
                "group chat needs at least one participant besides the creator",
            ));
        }

        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            if !user_exists(&tx, creator_id)? {
                return Err(StoreError::UserNotFound);
            }
            for uid in &members {
                if !user_exists(&tx, uid)? {
                    return Err(StoreError::UserNotFound);
                }
            }

            tx.execute(
                "INSERT INTO chats (id, is_group, name, description, avatar_ref, created_at, updated_at)
                 VALUES (?1, 1, ?2, ?3, ?4, ?5, ?5)",
                params![id, name, description, avatar_ref, now],
            )?;
            tx.execute(
                "INSERT INTO chat_participants (chat_id, user_id, is_admin, joined_at)
                 VALUES (?1, ?2, 1, ?3)",
                params![id, creator_id, now],
            )?;
            for uid in &members {
                tx.execute(
                    "INSERT INTO chat_participants (chat_id, user_id, is_admin, joined_at)
                     VALUES (?1, ?2, 0, ?3)",
                    params![id, uid, now],
                )?;
            }
            tx.commit()?;

            query_chat_by_id(conn, id)?.ok_or(StoreError::ChatNotFound)
        })
    }

    pub fn get_chat(&self, id: &str) -> Result<Option<ChatRow>, StoreError> {
        self.with_conn(|conn| query_chat_by_id(conn, id))
    }

    pub fn get_participants(&self, chat_id: &str) -> Result<Vec<ParticipantRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT p.user_id, u.username, u.avatar_ref, p.is_admin, p.joined_at
                 FROM chat_participants p
                 LEFT JOIN users u ON u.id = p.user_id
                 WHERE p.chat_id = ?1
                 ORDER BY p.joined_at ASC, p.user_id ASC",
            )?;
            let rows = stmt
                .query_map([chat_id], |row| {
                    Ok(ParticipantRow {
                        user_id: row.get(0)?,
                        username: row
                            .get::<_, Option<String>>(1)?
                            .unwrap_or_else(|| "unknown".to_string()),
                        avatar_ref: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                        is_admin: row.get(3)?,
                        joined_at: row.get(4)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn is_participant(&self, chat_id: &str, user_id: &str) -> Result<bool, StoreError> {
        self.with_conn(|conn| participant_exists(conn, chat_id, user_id))
    }

    // -- Chat list aggregation --

    /// Per-user chat list, ordered by most recent activity. Executes as a
    /// single statement so every summary in the result reflects one
    /// consistent snapshot of the store.
    pub fn list_chats(&self, user_id: &str) -> Result<Vec<ChatSummaryRow>, StoreError> {
        self.with_conn(|conn| query_chat_summaries(conn, user_id, None))
    }

    /// Summary of one chat as seen by `user_id`, or None when the chat
    /// does not exist or the user is not a participant.
    pub fn get_chat_summary(
        &self,
        chat_id: &str,
        user_id: &str,
    ) -> Result<Option<ChatSummaryRow>, StoreError> {
        self.with_conn(|conn| {
            let mut rows = query_chat_summaries(conn, user_id, Some(chat_id))?;
            Ok(rows.pop())
        })
    }

    // -- Messages --

    /// Persist a message and bump the chat's updated_at in one
    /// transaction. `after_commit` runs once the transaction has
    /// committed, while the connection lock is still held — fanning out
    /// from there means per-chat broadcast order equals commit order, and
    /// a broadcast can never precede visibility of the row.
    pub fn send_message<F>(
        &self,
        id: &str,
        chat_id: &str,
        sender_id: &str,
        content: &str,
        attachment_ref: &str,
        now: &str,
        after_commit: F,
    ) -> Result<(), StoreError>
    where
        F: FnOnce(),
    {
        if content.trim().is_empty() && attachment_ref.is_empty() {
            return Err(StoreError::InvalidArgument(
                "message needs content or an attachment",
            ));
        }

        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            if !chat_exists(&tx, chat_id)? {
                return Err(StoreError::ChatNotFound);
            }
            if !participant_exists(&tx, chat_id, sender_id)? {
                return Err(StoreError::NotParticipant);
            }

            tx.execute(
                "INSERT INTO messages (id, chat_id, sender_id, content, attachment_ref, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, chat_id, sender_id, content, attachment_ref, now],
            )?;
            tx.execute(
                "UPDATE chats SET updated_at = ?2 WHERE id = ?1",
                params![chat_id, now],
            )?;
            tx.commit()?;

            after_commit();
            Ok(())
        })
    }

    /// Page of messages for a chat, returned oldest-first. `before` is a
    /// created_at cursor: pass the timestamp of the oldest message from
    /// the previous page to walk further back.
    pub fn list_messages(
        &self,
        chat_id: &str,
        user_id: &str,
        limit: u32,
        before: Option<&str>,
    ) -> Result<Vec<MessageRow>, StoreError> {
        self.with_conn(|conn| {
            if !chat_exists(conn, chat_id)? {
                return Err(StoreError::ChatNotFound);
            }
            if !participant_exists(conn, chat_id, user_id)? {
                return Err(StoreError::NotParticipant);
            }

            let mut rows = query_messages_page(conn, chat_id, limit, before)?;
            // Fetched newest-first for the cursor; callers get them ascending.
            rows.reverse();
            Ok(rows)
        })
    }

    // -- Unread accounting --

    /// Messages in `chat_id` not yet read by `user_id`: sent by someone
    /// else, with created_at past the caller's read marker (or past the
    /// chat's creation when no marker exists yet).
    pub fn unread_count(&self, user_id: &str, chat_id: &str) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*)
                 FROM messages m
                 JOIN chats c ON c.id = m.chat_id
                 WHERE m.chat_id = ?1
                   AND m.sender_id <> ?2
                   AND m.created_at > COALESCE(
                       (SELECT r.last_read_at FROM read_markers r
                         WHERE r.chat_id = ?1 AND r.user_id = ?2),
                       c.created_at)",
                params![chat_id, user_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Upsert the caller's read marker to `now`. The upsert is a single
    /// statement, so it interleaves safely with concurrent message
    /// inserts: a message committed with a later created_at stays unread.
    pub fn mark_read(&self, user_id: &str, chat_id: &str, now: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            if !participant_exists(conn, chat_id, user_id)? {
                return Err(StoreError::NotParticipant);
            }
            conn.execute(
                "INSERT INTO read_markers (user_id, chat_id, last_read_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id, chat_id) DO UPDATE SET last_read_at = excluded.last_read_at",
                params![user_id, chat_id, now],
            )?;
            Ok(())
        })
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

fn user_exists(conn: &Connection, id: &str) -> Result<bool, StoreError> {
    let found = conn
        .query_row("SELECT 1 FROM users WHERE id = ?1", [id], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

fn chat_exists(conn: &Connection, id: &str) -> Result<bool, StoreError> {
    let found = conn
        .query_row("SELECT 1 FROM chats WHERE id = ?1", [id], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

fn participant_exists(conn: &Connection, chat_id: &str, user_id: &str) -> Result<bool, StoreError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM chat_participants WHERE chat_id = ?1 AND user_id = ?2",
            params![chat_id, user_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn map_user_row(row: &rusqlite::Row) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        avatar_ref: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn map_chat_row(row: &rusqlite::Row) -> rusqlite::Result<ChatRow> {
    Ok(ChatRow {
        id: row.get(0)?,
        is_group: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        avatar_ref: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn query_user_by_id(conn: &Connection, id: &str) -> Result<Option<UserRow>, StoreError> {
    let row = conn
        .query_row(
            "SELECT id, username, avatar_ref, created_at FROM users WHERE id = ?1",
            [id],
            map_user_row,
        )
        .optional()?;
    Ok(row)
}

const CHAT_COLUMNS: &str =
    "id, is_group, name, description, avatar_ref, created_at, updated_at";

fn query_chat_by_id(conn: &Connection, id: &str) -> Result<Option<ChatRow>, StoreError> {
    let sql = format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?1");
    let row = conn.query_row(&sql, [id], map_chat_row).optional()?;
    Ok(row)
}

fn query_direct_chat_by_pair(
    conn: &Connection,
    lo: &str,
    hi: &str,
) -> Result<Option<ChatRow>, StoreError> {
    let sql = format!(
        "SELECT {CHAT_COLUMNS} FROM chats WHERE is_group = 0 AND peer_lo = ?1 AND peer_hi = ?2"
    );
    let row = conn
        .query_row(&sql, params![lo, hi], map_chat_row)
        .optional()?;
    Ok(row)
}

/// The chat-list projection: display name/avatar resolved per reader
/// (stored values for groups, the counterparty's current profile for
/// direct chats), the latest message joined by rowid, and the unread
/// count computed against the reader's marker. Ordered by most recent
/// activity, ties broken by chat id for a stable listing.
fn query_chat_summaries(
    conn: &Connection,
    user_id: &str,
    chat_id: Option<&str>,
) -> Result<Vec<ChatSummaryRow>, StoreError> {
    let filter = if chat_id.is_some() {
        "WHERE c.id = ?2"
    } else {
        ""
    };
    let sql = format!(
        "SELECT
            c.id,
            c.is_group,
            CASE WHEN c.is_group = 1 THEN c.name ELSE COALESCE(ou.username, 'unknown') END,
            CASE WHEN c.is_group = 1 THEN c.avatar_ref ELSE COALESCE(ou.avatar_ref, '') END,
            c.updated_at,
            lm.id, lm.sender_id, lu.username, lm.content, lm.attachment_ref, lm.created_at,
            (SELECT COUNT(*) FROM messages m
              WHERE m.chat_id = c.id
                AND m.sender_id <> ?1
                AND m.created_at > COALESCE(
                    (SELECT r.last_read_at FROM read_markers r
                      WHERE r.chat_id = c.id AND r.user_id = ?1),
                    c.created_at))
         FROM chats c
         JOIN chat_participants p ON p.chat_id = c.id AND p.user_id = ?1
         LEFT JOIN chat_participants op
                ON c.is_group = 0 AND op.chat_id = c.id AND op.user_id <> ?1
         LEFT JOIN users ou ON ou.id = op.user_id
         LEFT JOIN messages lm ON lm.rowid = (
             SELECT m2.rowid FROM messages m2
              WHERE m2.chat_id = c.id
              ORDER BY m2.created_at DESC, m2.rowid DESC
              LIMIT 1)
         LEFT JOIN users lu ON lu.id = lm.sender_id
         {filter}
         ORDER BY MAX(COALESCE(lm.created_at, c.created_at), c.created_at) DESC, c.id ASC"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = match chat_id {
        Some(cid) => stmt.query_map(params![user_id, cid], map_summary_row)?,
        None => stmt.query_map(params![user_id], map_summary_row)?,
    }
    .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn map_summary_row(row: &rusqlite::Row) -> rusqlite::Result<ChatSummaryRow> {
    let chat_id: String = row.get(0)?;
    let last_message = match row.get::<_, Option<String>>(5)? {
        Some(message_id) => Some(MessageRow {
            id: message_id,
            chat_id: chat_id.clone(),
            sender_id: row.get(6)?,
            sender_username: row
                .get::<_, Option<String>>(7)?
                .unwrap_or_else(|| "unknown".to_string()),
            content: row.get(8)?,
            attachment_ref: row.get(9)?,
            created_at: row.get(10)?,
        }),
        None => None,
    };

    Ok(ChatSummaryRow {
        chat_id,
        is_group: row.get(1)?,
        name: row.get(2)?,
        avatar_ref: row.get(3)?,
        updated_at: row.get(4)?,
        last_message,
        unread_count: row.get(11)?,
    })
}

fn query_messages_page(
    conn: &Connection,
    chat_id: &str,
    limit: u32,
    before: Option<&str>,
) -> Result<Vec<MessageRow>, StoreError> {
    // JOIN users to fetch sender_username in a single query (eliminates N+1)
    let map = |row: &rusqlite::Row| -> rusqlite::Result<MessageRow> {
        Ok(MessageRow {
            id: row.get(0)?,
            chat_id: row.get(1)?,
            sender_id: row.get(2)?,
            sender_username: row
                .get::<_, Option<String>>(3)?
                .unwrap_or_else(|| "unknown".to_string()),
            content: row.get(4)?,
            attachment_ref: row.get(5)?,
            created_at: row.get(6)?,
        })
    };

    let rows = match before {
        Some(cursor) => {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.chat_id, m.sender_id, u.username, m.content, m.attachment_ref, m.created_at
                 FROM messages m
                 LEFT JOIN users u ON u.id = m.sender_id
                 WHERE m.chat_id = ?1 AND m.created_at < ?2
                 ORDER BY m.created_at DESC, m.rowid DESC
                 LIMIT ?3",
            )?;
            stmt.query_map(params![chat_id, cursor, limit], map)?
                .collect::<Result<Vec<_>, _>>()?
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.chat_id, m.sender_id, u.username, m.content, m.attachment_ref, m.created_at
                 FROM messages m
                 LEFT JOIN users u ON u.id = m.sender_id
                 WHERE m.chat_id = ?1
                 ORDER BY m.created_at DESC, m.rowid DESC
                 LIMIT ?2",
            )?;
            stmt.query_map(params![chat_id, limit], map)?
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fmt_ts;
    use chrono::{Duration, TimeZone, Utc};
    use uuid::Uuid;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn ts(secs: i64) -> String {
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        fmt_ts(base + Duration::seconds(secs))
    }

    fn uid(n: u128) -> String {
        Uuid::from_u128(n).to_string()
    }

    fn add_user(db: &Database, n: u128, name: &str) -> String {
        let id = uid(n);
        db.insert_user(&id, name, "", &ts(0)).unwrap();
        id
    }

    fn count(db: &Database, table: &str) -> i64 {
        db.with_conn(|conn| {
            let sql = format!("SELECT COUNT(*) FROM {table}");
            Ok(conn.query_row(&sql, [], |row| row.get(0))?)
        })
        .unwrap()
    }

    #[test]
    fn direct_chat_pair_is_unique() {
        let db = db();
        let a = add_user(&db, 1, "alice");
        let b = add_user(&db, 2, "bob");

        let first = db.create_direct_chat(&uid(100), &a, &b, &ts(1)).unwrap();
        // Same pair in reversed order resolves to the existing chat.
        let second = db.create_direct_chat(&uid(101), &b, &a, &ts(2)).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(count(&db, "chats"), 1);
        assert_eq!(count(&db, "chat_participants"), 2);
    }

    #[test]
    fn direct_chat_with_self_rejected() {
        let db = db();
        let a = add_user(&db, 1, "alice");

        let err = db.create_direct_chat(&uid(100), &a, &a, &ts(1)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
        assert_eq!(count(&db, "chats"), 0);
    }

    #[test]
    fn direct_chat_requires_known_users() {
        let db = db();
        let a = add_user(&db, 1, "alice");

        let err = db
            .create_direct_chat(&uid(100), &a, &uid(99), &ts(1))
            .unwrap_err();
        assert!(matches!(err, StoreError::UserNotFound));
        assert_eq!(count(&db, "chats"), 0);
    }

    #[test]
    fn group_chat_dedupes_participants_and_tags_creator_admin() {
        let db = db();
        let a = add_user(&db, 1, "alice");
        let b = add_user(&db, 2, "bob");
        let c = add_user(&db, 3, "carol");

        let chat = db
            .create_group_chat(
                &uid(200),
                &a,
                "Team",
                "",
                "",
                &[b.clone(), b.clone(), a.clone(), c.clone()],
                &ts(1),
            )
            .unwrap();

        assert!(chat.is_group);
        let participants = db.get_participants(&chat.id).unwrap();
        assert_eq!(participants.len(), 3);
        for p in &participants {
            assert_eq!(p.is_admin, p.user_id == a);
        }
    }

    #[test]
    fn group_chat_validation() {
        let db = db();
        let a = add_user(&db, 1, "alice");
        let b = add_user(&db, 2, "bob");

        let long_name = "x".repeat(101);
        let cases: Vec<(&str, Vec<String>)> = vec![
            ("", vec![b.clone()]),
            ("   ", vec![b.clone()]),
            (long_name.as_str(), vec![b.clone()]),
            ("Team", vec![]),
            ("Team", vec![a.clone()]),
        ];
        for (name, participants) in cases {
            let err = db
                .create_group_chat(&uid(200), &a, name, "", "", &participants, &ts(1))
                .unwrap_err();
            assert!(matches!(err, StoreError::InvalidArgument(_)), "name={name:?}");
        }
    }

    #[test]
    fn send_requires_participant_and_skips_fanout() {
        let db = db();
        let a = add_user(&db, 1, "alice");
        let b = add_user(&db, 2, "bob");
        let c = add_user(&db, 3, "carol");
        let chat = db.create_direct_chat(&uid(100), &a, &b, &ts(1)).unwrap();

        let mut fired = false;
        let err = db
            .send_message(&uid(300), &chat.id, &c, "hi", "", &ts(2), || fired = true)
            .unwrap_err();

        assert!(matches!(err, StoreError::NotParticipant));
        assert!(!fired);
        assert_eq!(count(&db, "messages"), 0);
    }

    #[test]
    fn send_to_missing_chat_is_not_found() {
        let db = db();
        let a = add_user(&db, 1, "alice");

        let err = db
            .send_message(&uid(300), &uid(999), &a, "hi", "", &ts(2), || {})
            .unwrap_err();
        assert!(matches!(err, StoreError::ChatNotFound));
    }

    #[test]
    fn empty_message_rejected() {
        let db = db();
        let a = add_user(&db, 1, "alice");
        let b = add_user(&db, 2, "bob");
        let chat = db.create_direct_chat(&uid(100), &a, &b, &ts(1)).unwrap();

        let err = db
            .send_message(&uid(300), &chat.id, &a, "   ", "", &ts(2), || {})
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));

        // Attachment-only messages are fine.
        db.send_message(&uid(301), &chat.id, &a, "", "blob://1", &ts(3), || {})
            .unwrap();
    }

    #[test]
    fn send_bumps_updated_at_and_runs_after_commit() {
        let db = db();
        let a = add_user(&db, 1, "alice");
        let b = add_user(&db, 2, "bob");
        let chat = db.create_direct_chat(&uid(100), &a, &b, &ts(1)).unwrap();

        let mut fired = false;
        db.send_message(&uid(300), &chat.id, &a, "hi", "", &ts(10), || fired = true)
            .unwrap();

        assert!(fired);
        let chat = db.get_chat(&chat.id).unwrap().unwrap();
        assert_eq!(chat.updated_at, ts(10));
    }

    #[test]
    fn unread_lifecycle() {
        let db = db();
        let a = add_user(&db, 1, "alice");
        let b = add_user(&db, 2, "bob");
        let chat = db.create_direct_chat(&uid(100), &a, &b, &ts(1)).unwrap();

        db.send_message(&uid(300), &chat.id, &b, "one", "", &ts(2), || {})
            .unwrap();
        db.send_message(&uid(301), &chat.id, &b, "two", "", &ts(3), || {})
            .unwrap();

        // No marker yet: everything after the chat's creation counts.
        assert_eq!(db.unread_count(&a, &chat.id).unwrap(), 2);
        // Own messages are never unread.
        assert_eq!(db.unread_count(&b, &chat.id).unwrap(), 0);

        db.mark_read(&a, &chat.id, &ts(4)).unwrap();
        assert_eq!(db.unread_count(&a, &chat.id).unwrap(), 0);

        // A message committed after the marker stays unread.
        db.send_message(&uid(302), &chat.id, &b, "three", "", &ts(5), || {})
            .unwrap();
        assert_eq!(db.unread_count(&a, &chat.id).unwrap(), 1);

        // Marking read again is idempotent.
        db.mark_read(&a, &chat.id, &ts(6)).unwrap();
        db.mark_read(&a, &chat.id, &ts(6)).unwrap();
        assert_eq!(db.unread_count(&a, &chat.id).unwrap(), 0);
    }

    #[test]
    fn mark_read_requires_participant() {
        let db = db();
        let a = add_user(&db, 1, "alice");
        let b = add_user(&db, 2, "bob");
        let c = add_user(&db, 3, "carol");
        let chat = db.create_direct_chat(&uid(100), &a, &b, &ts(1)).unwrap();

        let err = db.mark_read(&c, &chat.id, &ts(2)).unwrap_err();
        assert!(matches!(err, StoreError::NotParticipant));
    }

    #[test]
    fn direct_display_name_tracks_counterparty_profile() {
        let db = db();
        let a = add_user(&db, 1, "alice");
        let b = add_user(&db, 2, "bob");
        db.create_direct_chat(&uid(100), &a, &b, &ts(1)).unwrap();

        assert_eq!(db.list_chats(&a).unwrap()[0].name, "bob");
        assert_eq!(db.list_chats(&b).unwrap()[0].name, "alice");

        // Profile changes show up on the next read, never cached on the chat.
        db.update_user_profile(&b, "robert", "avatars/robert").unwrap();
        let for_a = db.list_chats(&a).unwrap();
        assert_eq!(for_a[0].name, "robert");
        assert_eq!(for_a[0].avatar_ref, "avatars/robert");
        assert_eq!(db.list_chats(&b).unwrap()[0].name, "alice");
    }

    #[test]
    fn list_chats_orders_by_activity_with_stable_ties() {
        let db = db();
        let a = add_user(&db, 1, "alice");
        let b = add_user(&db, 2, "bob");
        let c = add_user(&db, 3, "carol");

        // Two group chats created at the same instant: tie broken by id asc.
        let g1 = db
            .create_group_chat(&uid(210), &a, "One", "", "", &[b.clone()], &ts(3))
            .unwrap();
        let g2 = db
            .create_group_chat(&uid(211), &a, "Two", "", "", &[c.clone()], &ts(3))
            .unwrap();
        let direct = db.create_direct_chat(&uid(100), &a, &b, &ts(2)).unwrap();

        let order: Vec<String> = db
            .list_chats(&a)
            .unwrap()
            .iter()
            .map(|s| s.chat_id.clone())
            .collect();
        assert_eq!(order, vec![g1.id.clone(), g2.id.clone(), direct.id.clone()]);

        // New activity moves a chat to the front.
        db.send_message(&uid(300), &direct.id, &b, "hi", "", &ts(9), || {})
            .unwrap();
        let order: Vec<String> = db
            .list_chats(&a)
            .unwrap()
            .iter()
            .map(|s| s.chat_id.clone())
            .collect();
        assert_eq!(order, vec![direct.id.clone(), g1.id, g2.id]);

        // Repeated calls with no writes are identical.
        let again: Vec<String> = db
            .list_chats(&a)
            .unwrap()
            .iter()
            .map(|s| s.chat_id.clone())
            .collect();
        assert_eq!(order, again);
    }

    #[test]
    fn last_message_tiebreak_by_insertion_order() {
        let db = db();
        let a = add_user(&db, 1, "alice");
        let b = add_user(&db, 2, "bob");
        let chat = db.create_direct_chat(&uid(100), &a, &b, &ts(1)).unwrap();

        // Identical timestamps: the later insert wins.
        db.send_message(&uid(300), &chat.id, &a, "first", "", &ts(5), || {})
            .unwrap();
        db.send_message(&uid(301), &chat.id, &b, "second", "", &ts(5), || {})
            .unwrap();

        let summaries = db.list_chats(&a).unwrap();
        let last = summaries[0].last_message.as_ref().unwrap();
        assert_eq!(last.content, "second");
        assert_eq!(last.sender_username, "bob");
    }

    #[test]
    fn contacts_come_from_direct_chats_only() {
        let db = db();
        let a = add_user(&db, 1, "alice");
        let b = add_user(&db, 2, "bob");
        let c = add_user(&db, 3, "carol");

        db.create_direct_chat(&uid(100), &a, &b, &ts(1)).unwrap();
        db.create_group_chat(&uid(200), &a, "Team", "", "", &[c.clone()], &ts(2))
            .unwrap();

        let contacts = db.list_contacts(&a).unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].username, "bob");
    }

    #[test]
    fn messages_page_ascending_with_cursor() {
        let db = db();
        let a = add_user(&db, 1, "alice");
        let b = add_user(&db, 2, "bob");
        let chat = db.create_direct_chat(&uid(100), &a, &b, &ts(0)).unwrap();

        for i in 1..=5i64 {
            db.send_message(
                &uid(300 + i as u128),
                &chat.id,
                &a,
                &format!("m{i}"),
                "",
                &ts(i),
                || {},
            )
            .unwrap();
        }

        let all = db.list_messages(&chat.id, &a, 50, None).unwrap();
        let contents: Vec<&str> = all.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m1", "m2", "m3", "m4", "m5"]);

        let page = db.list_messages(&chat.id, &a, 2, None).unwrap();
        let contents: Vec<&str> = page.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m4", "m5"]);

        let older = db
            .list_messages(&chat.id, &a, 2, Some(&page[0].created_at))
            .unwrap();
        let contents: Vec<&str> = older.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3"]);
    }

    #[test]
    fn list_messages_gated_to_participants() {
        let db = db();
        let a = add_user(&db, 1, "alice");
        let b = add_user(&db, 2, "bob");
        let c = add_user(&db, 3, "carol");
        let chat = db.create_direct_chat(&uid(100), &a, &b, &ts(1)).unwrap();

        let err = db.list_messages(&chat.id, &c, 50, None).unwrap_err();
        assert!(matches!(err, StoreError::NotParticipant));
    }

    #[test]
    fn summary_hidden_from_non_participant() {
        let db = db();
        let a = add_user(&db, 1, "alice");
        let b = add_user(&db, 2, "bob");
        let c = add_user(&db, 3, "carol");
        let chat = db.create_direct_chat(&uid(100), &a, &b, &ts(1)).unwrap();

        assert!(db.get_chat_summary(&chat.id, &a).unwrap().is_some());
        assert!(db.get_chat_summary(&chat.id, &c).unwrap().is_none());
        assert!(db.get_chat_summary(&uid(999), &a).unwrap().is_none());
    }
}
