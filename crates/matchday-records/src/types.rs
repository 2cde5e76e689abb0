//! Shapes of the `response` elements the football API returns, one per
//! import kind. Only the fields that are stored are declared; everything
//! else in the payload is ignored.

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::Deserialize;

/// `2024` becomes `"2024/2025"`.
pub fn season_label(year: i32) -> String {
    format!("{}/{}", year, year + 1)
}

/// Reference to another entity by its API id.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiRef {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
}

/// A pair of optional per-side values (`goals`, `score.halftime`, ...).
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct Sides {
    pub home: Option<i64>,
    pub away: Option<i64>,
}

// ---------------------------------------------------------------------------
// leagues
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct LeagueItem {
    pub league: LeagueInfo,
    #[serde(default)]
    pub country: Option<CountryInfo>,
    #[serde(default)]
    pub seasons: Vec<SeasonInfo>,
}

#[derive(Debug, Deserialize)]
pub struct LeagueInfo {
    pub id: i64,
    pub name: String,
    #[serde(default, rename = "type")]
    pub league_type: Option<String>,
    #[serde(default)]
    pub logo: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CountryInfo {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SeasonInfo {
    pub year: i32,
    #[serde(default)]
    pub current: bool,
}

impl LeagueItem {
    pub fn current_season(&self) -> Option<String> {
        self.seasons
            .iter()
            .find(|s| s.current)
            .map(|s| season_label(s.year))
    }
}

// ---------------------------------------------------------------------------
// teams
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TeamItem {
    pub team: TeamInfo,
    #[serde(default)]
    pub venue: Option<VenueInfo>,
}

#[derive(Debug, Deserialize)]
pub struct TeamInfo {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub founded: Option<i64>,
    #[serde(default)]
    pub logo: Option<String>,
}

impl TeamInfo {
    /// The API code, or the first three letters of the name in upper case.
    pub fn short_name(&self) -> String {
        match self.code.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => code.to_string(),
            _ => self.name.chars().take(3).collect::<String>().to_uppercase(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct VenueInfo {
    pub name: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub capacity: Option<i64>,
}

// ---------------------------------------------------------------------------
// players and statistics
// ---------------------------------------------------------------------------

/// Both the `players` and the statistics imports receive this shape.
#[derive(Debug, Deserialize)]
pub struct PlayerItem {
    pub player: PlayerInfo,
    #[serde(default)]
    pub statistics: Vec<StatEntry>,
}

#[derive(Debug, Deserialize)]
pub struct PlayerInfo {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub firstname: Option<String>,
    #[serde(default)]
    pub lastname: Option<String>,
    #[serde(default)]
    pub birth: Option<Birth>,
    #[serde(default)]
    pub nationality: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub photo: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Birth {
    pub date: Option<NaiveDate>,
}

impl PlayerItem {
    /// Club of the first statistics entry, which the API lists first for
    /// the player's current team.
    pub fn club_ref(&self) -> Option<i64> {
        self.statistics
            .first()
            .and_then(|s| s.team.as_ref())
            .map(|t| t.id)
    }

    /// Position from the profile, else from the first statistics entry.
    pub fn position(&self) -> Option<String> {
        self.player.position.clone().or_else(|| {
            self.statistics
                .iter()
                .find_map(|s| s.games.position.clone())
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StatEntry {
    pub team: Option<ApiRef>,
    pub league: Option<StatLeague>,
    pub games: Games,
    pub goals: Goals,
    pub cards: Cards,
    pub shots: Totals,
    pub passes: Passes,
    pub tackles: Tackles,
    pub duels: Duels,
    pub penalty: Penalty,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StatLeague {
    pub id: Option<i64>,
    pub season: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Games {
    // sic: the API spells it this way
    pub appearences: Option<i64>,
    pub minutes: Option<i64>,
    pub position: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Goals {
    pub total: Option<i64>,
    pub assists: Option<i64>,
    pub conceded: Option<i64>,
    pub saves: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Cards {
    pub yellow: Option<i64>,
    pub red: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Totals {
    pub total: Option<i64>,
    pub on: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Passes {
    pub total: Option<i64>,
    pub key: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Tackles {
    pub total: Option<i64>,
    pub interceptions: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Duels {
    pub total: Option<i64>,
    pub won: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Penalty {
    pub saved: Option<i64>,
}

/// Season totals accumulated from one or more [`StatEntry`] values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeasonTotals {
    pub matches_played: i64,
    pub minutes_played: i64,
    pub goals: i64,
    pub assists: i64,
    pub yellow_cards: i64,
    pub red_cards: i64,
    pub shots: i64,
    pub shots_on_target: i64,
    pub passes: i64,
    pub key_passes: i64,
    pub tackles: i64,
    pub interceptions: i64,
    pub duels: i64,
    pub duels_won: i64,
    pub saves: i64,
    pub goals_conceded: i64,
    pub penalties_saved: i64,
}

impl SeasonTotals {
    pub fn add(&mut self, s: &StatEntry) {
        let n = |v: Option<i64>| v.unwrap_or(0);
        self.matches_played += n(s.games.appearences);
        self.minutes_played += n(s.games.minutes);
        self.goals += n(s.goals.total);
        self.assists += n(s.goals.assists);
        self.yellow_cards += n(s.cards.yellow);
        self.red_cards += n(s.cards.red);
        self.shots += n(s.shots.total);
        self.shots_on_target += n(s.shots.on);
        self.passes += n(s.passes.total);
        self.key_passes += n(s.passes.key);
        self.tackles += n(s.tackles.total);
        self.interceptions += n(s.tackles.interceptions);
        self.duels += n(s.duels.total);
        self.duels_won += n(s.duels.won);
        self.saves += n(s.goals.saves);
        self.goals_conceded += n(s.goals.conceded);
        self.penalties_saved += n(s.penalty.saved);
    }
}

// ---------------------------------------------------------------------------
// fixtures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct FixtureItem {
    pub fixture: FixtureInfo,
    pub league: FixtureLeague,
    pub teams: FixtureTeams,
    #[serde(default)]
    pub goals: Sides,
    #[serde(default)]
    pub score: Score,
}

#[derive(Debug, Deserialize)]
pub struct FixtureInfo {
    pub id: i64,
    pub date: DateTime<FixedOffset>,
    pub status: FixtureStatus,
}

#[derive(Debug, Deserialize)]
pub struct FixtureStatus {
    pub short: String,
}

#[derive(Debug, Deserialize)]
pub struct FixtureLeague {
    pub name: String,
    pub season: i32,
    #[serde(default)]
    pub round: Option<String>,
}

impl FixtureLeague {
    /// Trailing number of a round label such as `"Regular Season - 12"`.
    pub fn matchday(&self) -> Option<i64> {
        let round = self.round.as_deref()?;
        let digits: String = round
            .chars()
            .rev()
            .take_while(char::is_ascii_digit)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        digits.parse().ok()
    }
}

#[derive(Debug, Deserialize)]
pub struct FixtureTeams {
    pub home: ApiRef,
    pub away: ApiRef,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Score {
    pub halftime: Sides,
    pub extratime: Sides,
    pub penalty: Sides,
}

// ---------------------------------------------------------------------------
// standings
// ---------------------------------------------------------------------------

/// One league table; `standings` holds one list per group.
#[derive(Debug, Deserialize)]
pub struct StandingsItem {
    pub league: StandingsLeague,
}

#[derive(Debug, Deserialize)]
pub struct StandingsLeague {
    pub id: i64,
    pub season: i32,
    #[serde(default)]
    pub standings: Vec<Vec<StandingRow>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandingRow {
    pub rank: i64,
    pub team: ApiRef,
    #[serde(default)]
    pub points: Option<i64>,
    #[serde(default)]
    pub goals_diff: Option<i64>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub form: Option<String>,
    #[serde(default)]
    pub all: Record,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Record {
    pub played: Option<i64>,
    pub win: Option<i64>,
    pub draw: Option<i64>,
    pub lose: Option<i64>,
    pub goals: GoalsFor,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GoalsFor {
    #[serde(rename = "for")]
    pub scored: Option<i64>,
    pub against: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn season_label_spans_two_years() {
        assert_eq!(season_label(2024), "2024/2025");
    }

    #[test]
    fn short_name_falls_back_to_name_prefix() {
        let t: TeamInfo = serde_json::from_value(json!({"id": 1, "name": "Arsenal"})).unwrap();
        assert_eq!(t.short_name(), "ARS");
        let t: TeamInfo =
            serde_json::from_value(json!({"id": 1, "name": "Arsenal", "code": "AFC"})).unwrap();
        assert_eq!(t.short_name(), "AFC");
    }

    #[test]
    fn matchday_comes_from_round_suffix() {
        let l: FixtureLeague = serde_json::from_value(
            json!({"name": "Premier League", "season": 2024, "round": "Regular Season - 12"}),
        )
        .unwrap();
        assert_eq!(l.matchday(), Some(12));
        let l: FixtureLeague =
            serde_json::from_value(json!({"name": "Cup", "season": 2024, "round": "Final"}))
                .unwrap();
        assert_eq!(l.matchday(), None);
    }

    #[test]
    fn null_stat_fields_count_as_zero() {
        let entry: StatEntry = serde_json::from_value(json!({
            "games": {"appearences": 3, "minutes": null},
            "goals": {"total": 2, "assists": null, "saves": null},
            "shots": {"total": 5, "on": 4}
        }))
        .unwrap();
        let mut totals = SeasonTotals::default();
        totals.add(&entry);
        totals.add(&entry);
        assert_eq!(totals.matches_played, 6);
        assert_eq!(totals.minutes_played, 0);
        assert_eq!(totals.goals, 4);
        assert_eq!(totals.shots_on_target, 8);
    }
}
