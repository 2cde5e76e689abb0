use rusqlite::Connection;

use crate::error::Result;

/// Initialise the record tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_leagues_table(conn)?;
    create_clubs_table(conn)?;
    create_players_table(conn)?;
    create_matches_table(conn)?;
    create_player_stats_table(conn)?;
    create_standings_table(conn)?;
    Ok(())
}

/// Open the shared database file with its own connection. WAL plus a busy
/// timeout lets this writer coexist with the scheduler's connection.
pub fn open(path: &str) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
    init_db(&conn)?;
    Ok(conn)
}

fn create_leagues_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS leagues (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            api_id          INTEGER NOT NULL UNIQUE,
            name            TEXT NOT NULL,
            league_type     TEXT,
            country         TEXT,
            logo            TEXT,
            current_season  TEXT,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );",
    )?;
    Ok(())
}

fn create_clubs_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS clubs (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            api_id      INTEGER NOT NULL UNIQUE,
            name        TEXT NOT NULL,
            short_name  TEXT NOT NULL,
            tla         TEXT,
            crest       TEXT,
            country     TEXT,
            founded     INTEGER,
            venue       TEXT,
            address     TEXT,
            city        TEXT,
            capacity    INTEGER,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );",
    )?;
    Ok(())
}

/// `club_id` is only set once the club itself has been imported.
fn create_players_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS players (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            api_id         INTEGER NOT NULL UNIQUE,
            name           TEXT NOT NULL,
            first_name     TEXT,
            last_name      TEXT,
            date_of_birth  TEXT,
            nationality    TEXT,
            position       TEXT,
            photo_url      TEXT,
            club_id        INTEGER REFERENCES clubs(id),
            created_at     TEXT NOT NULL,
            updated_at     TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_players_club ON players(club_id);",
    )?;
    Ok(())
}

fn create_matches_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS matches (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            api_id           INTEGER NOT NULL UNIQUE,
            competition      TEXT NOT NULL,
            season           TEXT NOT NULL,
            matchday         INTEGER,
            kickoff          TEXT NOT NULL,
            status           TEXT NOT NULL,
            home_club_id     INTEGER NOT NULL REFERENCES clubs(id),
            away_club_id     INTEGER NOT NULL REFERENCES clubs(id),
            home_score       INTEGER,
            away_score       INTEGER,
            half_time_home   INTEGER,
            half_time_away   INTEGER,
            extra_time_home  INTEGER,
            extra_time_away  INTEGER,
            penalties_home   INTEGER,
            penalties_away   INTEGER,
            created_at       TEXT NOT NULL,
            updated_at       TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_matches_kickoff ON matches(kickoff);",
    )?;
    Ok(())
}

/// Season totals per player, summed across competitions.
fn create_player_stats_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS player_stats (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            player_id         INTEGER NOT NULL REFERENCES players(id),
            season            TEXT NOT NULL,
            matches_played    INTEGER NOT NULL DEFAULT 0,
            minutes_played    INTEGER NOT NULL DEFAULT 0,
            goals             INTEGER NOT NULL DEFAULT 0,
            assists           INTEGER NOT NULL DEFAULT 0,
            yellow_cards      INTEGER NOT NULL DEFAULT 0,
            red_cards         INTEGER NOT NULL DEFAULT 0,
            shots             INTEGER NOT NULL DEFAULT 0,
            shots_on_target   INTEGER NOT NULL DEFAULT 0,
            passes            INTEGER NOT NULL DEFAULT 0,
            key_passes        INTEGER NOT NULL DEFAULT 0,
            tackles           INTEGER NOT NULL DEFAULT 0,
            interceptions     INTEGER NOT NULL DEFAULT 0,
            duels             INTEGER NOT NULL DEFAULT 0,
            duels_won         INTEGER NOT NULL DEFAULT 0,
            saves             INTEGER NOT NULL DEFAULT 0,
            goals_conceded    INTEGER NOT NULL DEFAULT 0,
            penalties_saved   INTEGER NOT NULL DEFAULT 0,
            created_at        TEXT NOT NULL,
            updated_at        TEXT NOT NULL,
            UNIQUE(player_id, season)
        );",
    )?;
    Ok(())
}

fn create_standings_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS standings (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            league_api_id   INTEGER NOT NULL,
            season          TEXT NOT NULL,
            team_api_id     INTEGER NOT NULL,
            team_name       TEXT NOT NULL,
            group_name      TEXT,
            rank            INTEGER NOT NULL,
            points          INTEGER NOT NULL DEFAULT 0,
            played          INTEGER NOT NULL DEFAULT 0,
            won             INTEGER NOT NULL DEFAULT 0,
            drawn           INTEGER NOT NULL DEFAULT 0,
            lost            INTEGER NOT NULL DEFAULT 0,
            goals_for       INTEGER NOT NULL DEFAULT 0,
            goals_against   INTEGER NOT NULL DEFAULT 0,
            goal_diff       INTEGER NOT NULL DEFAULT 0,
            form            TEXT,
            updated_at      TEXT NOT NULL,
            UNIQUE(league_api_id, season, team_api_id)
        );",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_db_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN
                 ('leagues', 'clubs', 'players', 'matches', 'player_stats', 'standings')",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(n, 6);
    }
}
