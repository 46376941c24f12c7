use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- Owned by the external identity service; read here for display
        -- attributes and profile updates.
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            avatar_ref  TEXT NOT NULL DEFAULT '',
            created_at  TEXT NOT NULL
        );

        -- peer_lo/peer_hi hold the normalized (min, max) user-id pair for
        -- direct chats and are NULL for groups. The partial unique index
        -- is what makes concurrent direct-chat creation race-safe.
        CREATE TABLE IF NOT EXISTS chats (
            id          TEXT PRIMARY KEY,
            is_group    INTEGER NOT NULL,
            name        TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            avatar_ref  TEXT NOT NULL DEFAULT '',
            peer_lo     TEXT,
            peer_hi     TEXT,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_chats_direct_pair
            ON chats(peer_lo, peer_hi) WHERE is_group = 0;

        CREATE TABLE IF NOT EXISTS chat_participants (
            chat_id     TEXT NOT NULL REFERENCES chats(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            is_admin    INTEGER NOT NULL DEFAULT 0,
            joined_at   TEXT NOT NULL,
            PRIMARY KEY (chat_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_participants_user
            ON chat_participants(user_id);

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            chat_id         TEXT NOT NULL REFERENCES chats(id),
            sender_id       TEXT NOT NULL REFERENCES users(id),
            content         TEXT NOT NULL,
            attachment_ref  TEXT NOT NULL DEFAULT '',
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_chat
            ON messages(chat_id, created_at);

        -- Per-(user, chat) read marker: messages from other senders with
        -- created_at past the marker count as unread.
        CREATE TABLE IF NOT EXISTS read_markers (
            user_id         TEXT NOT NULL REFERENCES users(id),
            chat_id         TEXT NOT NULL REFERENCES chats(id),
            last_read_at    TEXT NOT NULL,
            PRIMARY KEY (user_id, chat_id)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
