use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use matchday_scheduler::{Clock, ImportSummary, ProcessError, ResponseProcessor, SystemClock};
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::db;
use crate::error::{RecordsError, Result};
use crate::types::{
    season_label, FixtureItem, LeagueItem, PlayerItem, SeasonTotals, StandingsItem, TeamItem,
};

/// Rows touched while storing one element.
#[derive(Debug, Default, Clone, Copy)]
struct Written {
    added: u32,
    updated: u32,
}

impl Written {
    fn added() -> Self {
        Self { added: 1, updated: 0 }
    }

    fn updated() -> Self {
        Self { added: 0, updated: 1 }
    }

    fn merge(&mut self, other: Written) {
        self.added += other.added;
        self.updated += other.updated;
    }
}

/// Why one element was not stored.
enum Fault {
    /// The element is malformed or refers to records we do not have.
    Skip(String),
    /// The database refused a write; the whole batch is abandoned.
    Store(RecordsError),
}

impl From<rusqlite::Error> for Fault {
    fn from(e: rusqlite::Error) -> Self {
        Fault::Store(RecordsError::Database(e))
    }
}

impl From<serde_json::Error> for Fault {
    fn from(e: serde_json::Error) -> Self {
        Fault::Skip(format!("malformed element: {e}"))
    }
}

type StoreFn = fn(&Connection, &Value, &str) -> std::result::Result<Written, Fault>;

/// Stores API payloads as domain records, upserting by the API's numeric ids.
///
/// A batch runs in one transaction and every element in its own savepoint,
/// so a bad element is rolled back alone while a storage failure discards
/// the batch. `created_at`/`updated_at` come from the injected [`Clock`].
pub struct RecordsProcessor {
    db: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl RecordsProcessor {
    pub fn new(conn: Connection) -> Result<Self> {
        db::init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            clock: Arc::new(SystemClock),
        })
    }

    /// Own connection to the database file at `path`.
    pub fn open(path: &str) -> Result<Self> {
        Ok(Self {
            db: Mutex::new(db::open(path)?),
            clock: Arc::new(SystemClock),
        })
    }

    /// Stamp records with `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn import(&self, kind: &'static str, items: &[Value], store: StoreFn) -> Result<ImportSummary> {
        let mut db = self.db.lock().map_err(|_| RecordsError::Poisoned)?;
        let mut tx = db.transaction()?;
        let now = self.clock.now().to_rfc3339();
        let mut summary = ImportSummary::default();

        for (idx, item) in items.iter().enumerate() {
            let sp = tx.savepoint()?;
            let outcome = {
                let conn: &Connection = &sp;
                store(conn, item, &now)
            };
            match outcome {
                Ok(written) => {
                    sp.commit()?;
                    for _ in 0..written.added {
                        summary.record_added();
                    }
                    for _ in 0..written.updated {
                        summary.record_updated();
                    }
                }
                Err(Fault::Skip(reason)) => {
                    // dropping the savepoint rolls the element back
                    drop(sp);
                    debug!(kind, index = idx, %reason, "element skipped");
                    summary.skip(format!("{kind}[{idx}]: {reason}"));
                }
                Err(Fault::Store(e)) => return Err(e),
            }
        }

        tx.commit()?;
        info!(
            kind,
            added = summary.added,
            updated = summary.updated,
            skipped = summary.skipped,
            "import batch stored"
        );
        Ok(summary)
    }
}

impl ResponseProcessor for RecordsProcessor {
    fn import_leagues(&self, items: &[Value]) -> std::result::Result<ImportSummary, ProcessError> {
        Ok(self.import("leagues", items, store_league)?)
    }

    fn import_teams(&self, items: &[Value]) -> std::result::Result<ImportSummary, ProcessError> {
        Ok(self.import("teams", items, store_team)?)
    }

    fn import_players(&self, items: &[Value]) -> std::result::Result<ImportSummary, ProcessError> {
        Ok(self.import("players", items, store_player)?)
    }

    fn import_fixtures(&self, items: &[Value]) -> std::result::Result<ImportSummary, ProcessError> {
        Ok(self.import("fixtures", items, store_fixture)?)
    }

    fn import_statistics(
        &self,
        items: &[Value],
    ) -> std::result::Result<ImportSummary, ProcessError> {
        Ok(self.import("statistics", items, store_statistics)?)
    }

    fn import_standings(
        &self,
        items: &[Value],
    ) -> std::result::Result<ImportSummary, ProcessError> {
        Ok(self.import("standings", items, store_standings)?)
    }
}

fn find_id(conn: &Connection, table: &'static str, api_id: i64) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        &format!("SELECT id FROM {table} WHERE api_id = ?1"),
        [api_id],
        |r| r.get(0),
    )
    .optional()
}

fn store_league(conn: &Connection, item: &Value, now: &str) -> std::result::Result<Written, Fault> {
    let l = LeagueItem::deserialize(item)?;
    let country = l.country.as_ref().and_then(|c| c.name.clone());
    let season = l.current_season();

    match find_id(conn, "leagues", l.league.id)? {
        Some(id) => {
            conn.execute(
                "UPDATE leagues SET name = ?1, league_type = ?2, country = ?3, logo = ?4,
                 current_season = COALESCE(?5, current_season), updated_at = ?6
                 WHERE id = ?7",
                params![l.league.name, l.league.league_type, country, l.league.logo, season, now, id],
            )?;
            Ok(Written::updated())
        }
        None => {
            conn.execute(
                "INSERT INTO leagues (api_id, name, league_type, country, logo, current_season,
                 created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    l.league.id,
                    l.league.name,
                    l.league.league_type,
                    country,
                    l.league.logo,
                    season,
                    now
                ],
            )?;
            Ok(Written::added())
        }
    }
}

fn store_team(conn: &Connection, item: &Value, now: &str) -> std::result::Result<Written, Fault> {
    let TeamItem { team, venue } = TeamItem::deserialize(item)?;
    let venue = venue.unwrap_or_default();
    let short_name = team.short_name();

    match find_id(conn, "clubs", team.id)? {
        Some(id) => {
            conn.execute(
                "UPDATE clubs SET name = ?1, short_name = ?2, tla = ?3, crest = ?4, country = ?5,
                 founded = ?6, venue = ?7, address = ?8, city = ?9, capacity = ?10,
                 updated_at = ?11 WHERE id = ?12",
                params![
                    team.name,
                    short_name,
                    team.code,
                    team.logo,
                    team.country,
                    team.founded,
                    venue.name,
                    venue.address,
                    venue.city,
                    venue.capacity,
                    now,
                    id
                ],
            )?;
            Ok(Written::updated())
        }
        None => {
            conn.execute(
                "INSERT INTO clubs (api_id, name, short_name, tla, crest, country, founded,
                 venue, address, city, capacity, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
                params![
                    team.id,
                    team.name,
                    short_name,
                    team.code,
                    team.logo,
                    team.country,
                    team.founded,
                    venue.name,
                    venue.address,
                    venue.city,
                    venue.capacity,
                    now
                ],
            )?;
            Ok(Written::added())
        }
    }
}

/// The club link is only set when that club is already stored, and an
/// unknown club never clears an existing link.
fn store_player(conn: &Connection, item: &Value, now: &str) -> std::result::Result<Written, Fault> {
    let p = PlayerItem::deserialize(item)?;
    let club_id = match p.club_ref() {
        Some(api_id) => find_id(conn, "clubs", api_id)?,
        None => None,
    };
    let position = p.position();
    let info = &p.player;
    let birth = info
        .birth
        .as_ref()
        .and_then(|b| b.date)
        .map(|d| d.to_string());

    match find_id(conn, "players", info.id)? {
        Some(id) => {
            conn.execute(
                "UPDATE players SET name = ?1, first_name = ?2, last_name = ?3,
                 date_of_birth = ?4, nationality = ?5, position = ?6, photo_url = ?7,
                 club_id = COALESCE(?8, club_id), updated_at = ?9 WHERE id = ?10",
                params![
                    info.name,
                    info.firstname,
                    info.lastname,
                    birth,
                    info.nationality,
                    position,
                    info.photo,
                    club_id,
                    now,
                    id
                ],
            )?;
            Ok(Written::updated())
        }
        None => {
            conn.execute(
                "INSERT INTO players (api_id, name, first_name, last_name, date_of_birth,
                 nationality, position, photo_url, club_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                params![
                    info.id,
                    info.name,
                    info.firstname,
                    info.lastname,
                    birth,
                    info.nationality,
                    position,
                    info.photo,
                    club_id,
                    now
                ],
            )?;
            Ok(Written::added())
        }
    }
}

fn store_fixture(conn: &Connection, item: &Value, now: &str) -> std::result::Result<Written, Fault> {
    let f = FixtureItem::deserialize(item)?;
    let fixture_id = f.fixture.id;

    let Some(home) = find_id(conn, "clubs", f.teams.home.id)? else {
        return Err(Fault::Skip(format!(
            "fixture {fixture_id}: home club {} not imported",
            f.teams.home.id
        )));
    };
    let Some(away) = find_id(conn, "clubs", f.teams.away.id)? else {
        return Err(Fault::Skip(format!(
            "fixture {fixture_id}: away club {} not imported",
            f.teams.away.id
        )));
    };

    let kickoff = f.fixture.date.with_timezone(&Utc).to_rfc3339();
    let season = season_label(f.league.season);
    let matchday = f.league.matchday();
    let s = &f.score;

    match find_id(conn, "matches", fixture_id)? {
        Some(id) => {
            conn.execute(
                "UPDATE matches SET competition = ?1, season = ?2, matchday = ?3, kickoff = ?4,
                 status = ?5, home_club_id = ?6, away_club_id = ?7, home_score = ?8,
                 away_score = ?9, half_time_home = ?10, half_time_away = ?11,
                 extra_time_home = ?12, extra_time_away = ?13, penalties_home = ?14,
                 penalties_away = ?15, updated_at = ?16 WHERE id = ?17",
                params![
                    f.league.name,
                    season,
                    matchday,
                    kickoff,
                    f.fixture.status.short,
                    home,
                    away,
                    f.goals.home,
                    f.goals.away,
                    s.halftime.home,
                    s.halftime.away,
                    s.extratime.home,
                    s.extratime.away,
                    s.penalty.home,
                    s.penalty.away,
                    now,
                    id
                ],
            )?;
            Ok(Written::updated())
        }
        None => {
            conn.execute(
                "INSERT INTO matches (api_id, competition, season, matchday, kickoff, status,
                 home_club_id, away_club_id, home_score, away_score, half_time_home,
                 half_time_away, extra_time_home, extra_time_away, penalties_home,
                 penalties_away, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                 ?16, ?17, ?17)",
                params![
                    fixture_id,
                    f.league.name,
                    season,
                    matchday,
                    kickoff,
                    f.fixture.status.short,
                    home,
                    away,
                    f.goals.home,
                    f.goals.away,
                    s.halftime.home,
                    s.halftime.away,
                    s.extratime.home,
                    s.extratime.away,
                    s.penalty.home,
                    s.penalty.away,
                    now
                ],
            )?;
            Ok(Written::added())
        }
    }
}

/// Entries are summed per season, so a player's league and cup numbers
/// land in one row.
fn store_statistics(
    conn: &Connection,
    item: &Value,
    now: &str,
) -> std::result::Result<Written, Fault> {
    let p = PlayerItem::deserialize(item)?;
    let Some(player_id) = find_id(conn, "players", p.player.id)? else {
        return Err(Fault::Skip(format!("player {} not imported", p.player.id)));
    };

    let mut seasons: BTreeMap<i32, SeasonTotals> = BTreeMap::new();
    for entry in &p.statistics {
        if let Some(year) = entry.league.as_ref().and_then(|l| l.season) {
            seasons.entry(year).or_default().add(entry);
        }
    }
    if seasons.is_empty() {
        return Err(Fault::Skip(format!(
            "player {} has no season statistics",
            p.player.id
        )));
    }

    let mut written = Written::default();
    for (year, t) in seasons {
        let season = season_label(year);
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM player_stats WHERE player_id = ?1 AND season = ?2",
                params![player_id, season],
                |r| r.get(0),
            )
            .optional()?;
        let values: [&dyn ToSql; 20] = [
            &t.matches_played,
            &t.minutes_played,
            &t.goals,
            &t.assists,
            &t.yellow_cards,
            &t.red_cards,
            &t.shots,
            &t.shots_on_target,
            &t.passes,
            &t.key_passes,
            &t.tackles,
            &t.interceptions,
            &t.duels,
            &t.duels_won,
            &t.saves,
            &t.goals_conceded,
            &t.penalties_saved,
            &now,
            &player_id,
            &season,
        ];
        if existing.is_some() {
            conn.execute(
                "UPDATE player_stats SET matches_played = ?1, minutes_played = ?2, goals = ?3,
                 assists = ?4, yellow_cards = ?5, red_cards = ?6, shots = ?7,
                 shots_on_target = ?8, passes = ?9, key_passes = ?10, tackles = ?11,
                 interceptions = ?12, duels = ?13, duels_won = ?14, saves = ?15,
                 goals_conceded = ?16, penalties_saved = ?17, updated_at = ?18
                 WHERE player_id = ?19 AND season = ?20",
                &values[..],
            )?;
            written.merge(Written::updated());
        } else {
            conn.execute(
                "INSERT INTO player_stats (matches_played, minutes_played, goals, assists,
                 yellow_cards, red_cards, shots, shots_on_target, passes, key_passes, tackles,
                 interceptions, duels, duels_won, saves, goals_conceded, penalties_saved,
                 created_at, updated_at, player_id, season)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                 ?16, ?17, ?18, ?18, ?19, ?20)",
                &values[..],
            )?;
            written.merge(Written::added());
        }
    }
    Ok(written)
}

/// One element is a whole league table; every row counts separately.
fn store_standings(
    conn: &Connection,
    item: &Value,
    now: &str,
) -> std::result::Result<Written, Fault> {
    let StandingsItem { league } = StandingsItem::deserialize(item)?;
    let season = season_label(league.season);
    let rows: Vec<_> = league.standings.iter().flatten().collect();
    if rows.is_empty() {
        return Err(Fault::Skip(format!("league {} has no table", league.id)));
    }

    let mut written = Written::default();
    for row in rows {
        let updated = conn.execute(
            "UPDATE standings SET team_name = ?1, group_name = ?2, rank = ?3, points = ?4,
             played = ?5, won = ?6, drawn = ?7, lost = ?8, goals_for = ?9,
             goals_against = ?10, goal_diff = ?11, form = ?12, updated_at = ?13
             WHERE league_api_id = ?14 AND season = ?15 AND team_api_id = ?16",
            params![
                row.team.name.as_deref().unwrap_or_default(),
                row.group,
                row.rank,
                row.points.unwrap_or(0),
                row.all.played.unwrap_or(0),
                row.all.win.unwrap_or(0),
                row.all.draw.unwrap_or(0),
                row.all.lose.unwrap_or(0),
                row.all.goals.scored.unwrap_or(0),
                row.all.goals.against.unwrap_or(0),
                row.goals_diff.unwrap_or(0),
                row.form,
                now,
                league.id,
                season,
                row.team.id
            ],
        )?;
        if updated > 0 {
            written.merge(Written::updated());
            continue;
        }
        conn.execute(
            "INSERT INTO standings (team_name, group_name, rank, points, played, won, drawn,
             lost, goals_for, goals_against, goal_diff, form, updated_at, league_api_id,
             season, team_api_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                row.team.name.as_deref().unwrap_or_default(),
                row.group,
                row.rank,
                row.points.unwrap_or(0),
                row.all.played.unwrap_or(0),
                row.all.win.unwrap_or(0),
                row.all.draw.unwrap_or(0),
                row.all.lose.unwrap_or(0),
                row.all.goals.scored.unwrap_or(0),
                row.all.goals.against.unwrap_or(0),
                row.goals_diff.unwrap_or(0),
                row.form,
                now,
                league.id,
                season,
                row.team.id
            ],
        )?;
        written.merge(Written::added());
    }
    Ok(written)
}
