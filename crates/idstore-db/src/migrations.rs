use rusqlite::Connection;
use tracing::info;

/// Named triggers stand in for foreign keys wherever the error translator
/// needs to know which relationship failed; SQLite does not name violated
/// foreign keys in its error messages.
pub fn run(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Identity DB: running migration v1 (initial schema)");
        conn.execute_batch(
            "
            BEGIN;

            CREATE TABLE accounts (
                id          TEXT PRIMARY KEY,
                kind        TEXT NOT NULL CHECK (kind IN ('ADMIN', 'USER'))
            );

            CREATE TABLE admins (
                id              TEXT PRIMARY KEY REFERENCES accounts(id),
                id_name         TEXT NOT NULL UNIQUE,
                real_name       TEXT NOT NULL,
                time_created    INTEGER NOT NULL,
                time_updated    INTEGER NOT NULL,
                password_algo   TEXT NOT NULL,
                password_hash   TEXT NOT NULL,
                password_salt   TEXT NOT NULL,
                permissions     TEXT NOT NULL
            );

            CREATE TABLE users (
                id              TEXT PRIMARY KEY REFERENCES accounts(id),
                id_name         TEXT NOT NULL UNIQUE,
                real_name       TEXT NOT NULL,
                time_created    INTEGER NOT NULL,
                time_updated    INTEGER NOT NULL,
                password_algo   TEXT NOT NULL,
                password_hash   TEXT NOT NULL,
                password_salt   TEXT NOT NULL,
                deleting        INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX idx_admins_time_created ON admins(time_created, id);
            CREATE INDEX idx_admins_time_updated ON admins(time_updated, id);
            CREATE INDEX idx_users_time_created ON users(time_created, id);
            CREATE INDEX idx_users_time_updated ON users(time_updated, id);

            CREATE TABLE emails (
                email_address   TEXT NOT NULL,
                admin_id        TEXT REFERENCES admins(id),
                user_id         TEXT REFERENCES users(id),
                CONSTRAINT emails_owner_exclusive
                    CHECK ((admin_id IS NULL) <> (user_id IS NULL))
            );

            CREATE UNIQUE INDEX emails_address_unique ON emails(lower(email_address));
            CREATE INDEX idx_emails_admin ON emails(admin_id);
            CREATE INDEX idx_emails_user ON emails(user_id);

            CREATE TRIGGER emails_admin_exists
                BEFORE INSERT ON emails
                WHEN NEW.admin_id IS NOT NULL
                 AND NOT EXISTS (SELECT 1 FROM admins WHERE id = NEW.admin_id)
            BEGIN
                SELECT RAISE(ABORT, 'emails_admin_exists');
            END;

            CREATE TRIGGER emails_user_exists
                BEFORE INSERT ON emails
                WHEN NEW.user_id IS NOT NULL
                 AND NOT EXISTS (SELECT 1 FROM users WHERE id = NEW.user_id)
            BEGIN
                SELECT RAISE(ABORT, 'emails_user_exists');
            END;

            -- An account keeps at least one email. Users being deleted are exempt.
            CREATE TRIGGER emails_one_required_admin
                BEFORE DELETE ON emails
                WHEN OLD.admin_id IS NOT NULL
                 AND (SELECT COUNT(*) FROM emails WHERE admin_id = OLD.admin_id) <= 1
            BEGIN
                SELECT RAISE(ABORT, 'emails_one_required');
            END;

            CREATE TRIGGER emails_one_required_user
                BEFORE DELETE ON emails
                WHEN OLD.user_id IS NOT NULL
                 AND EXISTS (SELECT 1 FROM users WHERE id = OLD.user_id AND deleting = 0)
                 AND (SELECT COUNT(*) FROM emails WHERE user_id = OLD.user_id) <= 1
            BEGIN
                SELECT RAISE(ABORT, 'emails_one_required');
            END;

            CREATE TABLE email_verifications (
                user_id         TEXT NOT NULL REFERENCES users(id),
                email_address   TEXT NOT NULL,
                token_permit    TEXT NOT NULL UNIQUE,
                token_deny      TEXT NOT NULL UNIQUE,
                operation       TEXT NOT NULL CHECK (operation IN ('ADD', 'REMOVE')),
                expires         INTEGER NOT NULL
            );

            CREATE INDEX idx_email_verifications_user ON email_verifications(user_id);
            CREATE INDEX idx_email_verifications_expires ON email_verifications(expires);

            CREATE TRIGGER email_verifications_user_exists
                BEFORE INSERT ON email_verifications
                WHEN NOT EXISTS (SELECT 1 FROM users WHERE id = NEW.user_id)
            BEGIN
                SELECT RAISE(ABORT, 'email_verifications_user_exists');
            END;

            CREATE TABLE bans (
                user_id     TEXT PRIMARY KEY REFERENCES users(id),
                reason      TEXT NOT NULL,
                expires     INTEGER
            );

            CREATE TRIGGER bans_user_exists
                BEFORE INSERT ON bans
                WHEN NOT EXISTS (SELECT 1 FROM users WHERE id = NEW.user_id)
            BEGIN
                SELECT RAISE(ABORT, 'bans_user_exists');
            END;

            CREATE TABLE user_logins (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id     TEXT NOT NULL REFERENCES users(id),
                time        INTEGER NOT NULL,
                host        TEXT NOT NULL,
                user_agent  TEXT NOT NULL
            );

            CREATE INDEX idx_user_logins_user ON user_logins(user_id, time);

            CREATE TRIGGER user_logins_user_exists
                BEFORE INSERT ON user_logins
                WHEN NOT EXISTS (SELECT 1 FROM users WHERE id = NEW.user_id)
            BEGIN
                SELECT RAISE(ABORT, 'user_logins_user_exists');
            END;

            CREATE TABLE audit (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                time        INTEGER NOT NULL,
                owner       TEXT NOT NULL,
                type        TEXT NOT NULL,
                message     TEXT NOT NULL,
                attributes  TEXT NOT NULL DEFAULT '{}'
            );

            CREATE INDEX idx_audit_time ON audit(time);

            INSERT INTO schema_version (version) VALUES (1);

            COMMIT;
            ",
        )?;
    }

    info!("Identity DB migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(versions, 1);
    }

    #[test]
    fn email_must_have_exactly_one_owner() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO emails (email_address, admin_id, user_id) VALUES ('x@example.com', NULL, NULL)",
            [],
        );
        assert!(result.is_err());
    }
}
