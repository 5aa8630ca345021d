use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::Amount;
use crate::amount::Factor;
use crate::model::{
    Command, Court, CourtId, Discount, DiscountId, DiscountScope, Fixture, Game, GameId, Input,
    Refund, Role, Scheduled, Slot, SlotFilter, SlotId, User, UserId, Venue, VenueId, Wallet,
};

/// Errors that can occur when reading scenario rows or writing reports
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open {path}: {source}")]
    Open { path: String, source: csv::Error },

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized row type '{row_type}'")]
    UnrecognizedType { line: usize, row_type: String },

    #[error("line {line}: {row_type} missing {field}")]
    MissingField {
        line: usize,
        row_type: String,
        field: &'static str,
    },

    #[error("line {line}: invalid {field} '{value}'")]
    InvalidValue {
        line: usize,
        field: &'static str,
        value: String,
    },

    #[error("failed to write report: {0}")]
    Write(#[from] csv::Error),
}

/// One scenario row. Which columns are required depends on `type`.
#[derive(Debug, Deserialize)]
struct InputRow {
    at: DateTime<Utc>,
    r#type: String,
    user: Option<UserId>,
    slot: Option<SlotId>,
    court: Option<CourtId>,
    venue: Option<VenueId>,
    game: Option<GameId>,
    discount: Option<DiscountId>,
    amount: Option<f64>,
    percent: Option<f64>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    reference: Option<String>,
    reason: Option<String>,
    name: Option<String>,
    kind: Option<String>,
    min: Option<u32>,
    max: Option<u32>,
    rating: Option<f64>,
    role: Option<String>,
    invitee: Option<UserId>,
}

/// Field accessor that turns an absent column into `CsvError::MissingField`.
struct Fields<'a> {
    line: usize,
    row: &'a InputRow,
}

impl Fields<'_> {
    fn require<T: Clone>(&self, value: &Option<T>, field: &'static str) -> Result<T, CsvError> {
        value.clone().ok_or_else(|| CsvError::MissingField {
            line: self.line,
            row_type: self.row.r#type.clone(),
            field,
        })
    }

    fn user(&self) -> Result<UserId, CsvError> {
        self.require(&self.row.user, "user")
    }

    fn slot(&self) -> Result<SlotId, CsvError> {
        self.require(&self.row.slot, "slot")
    }

    fn game(&self) -> Result<GameId, CsvError> {
        self.require(&self.row.game, "game")
    }

    fn role(&self) -> Result<Role, CsvError> {
        match self.row.role.as_deref() {
            None | Some("") | Some("player") => Ok(Role::Player),
            Some("admin") => Ok(Role::Admin),
            Some(other) => Err(CsvError::InvalidValue {
                line: self.line,
                field: "role",
                value: other.to_string(),
            }),
        }
    }

    /// Drop empty strings so an empty column reads as absent.
    fn text(value: &Option<String>) -> Option<String> {
        value.clone().filter(|v| !v.is_empty())
    }
}

fn parse_row(line: usize, row: &InputRow) -> Result<Input, CsvError> {
    let f = Fields { line, row };
    let input = match row.r#type.as_str() {
        "venue" => Input::Fixture(Fixture::Venue(Venue {
            id: f.require(&row.venue, "venue")?,
            name: Fields::text(&row.name).unwrap_or_default(),
        })),
        "court" => Input::Fixture(Fixture::Court(Court {
            id: f.require(&row.court, "court")?,
            venue_id: f.require(&row.venue, "venue")?,
            name: Fields::text(&row.name).unwrap_or_default(),
            base_price: Amount::from_float(f.require(&row.amount, "amount")?),
        })),
        "slot" => Input::Fixture(Fixture::Slot(Slot::new(
            f.slot()?,
            f.require(&row.court, "court")?,
            f.require(&row.start, "start")?,
            f.require(&row.end, "end")?,
            Amount::from_float(row.amount.unwrap_or_default()),
        ))),
        "discount" => {
            let scope = match (row.court, row.venue) {
                (Some(court), _) => DiscountScope::Court(court),
                (None, Some(venue)) => DiscountScope::Venue(venue),
                (None, None) => {
                    return Err(CsvError::MissingField {
                        line,
                        row_type: row.r#type.clone(),
                        field: "court or venue",
                    });
                }
            };
            Input::Fixture(Fixture::Discount(Discount {
                id: f.require(&row.discount, "discount")?,
                scope,
                rate: Factor::from_percent(f.require(&row.percent, "percent")?),
                valid_from: f.require(&row.start, "start")?,
                valid_until: f.require(&row.end, "end")?,
            }))
        }
        "user" => Input::Fixture(Fixture::User(User {
            id: f.user()?,
            name: Fields::text(&row.name).unwrap_or_default(),
            rating: row.rating,
            role: f.role()?,
        })),
        "view" => Input::Command(Command::ViewSlots(SlotFilter {
            court_id: row.court,
            venue_id: row.venue,
            from: row.start,
            to: row.end,
        })),
        "lock" => Input::Command(Command::Lock {
            user: f.user()?,
            slot: f.slot()?,
        }),
        "confirm" => Input::Command(Command::Confirm {
            user: f.user()?,
            slot: f.slot()?,
            reference: Fields::text(&row.reference),
        }),
        "release" => Input::Command(Command::Release {
            user: f.user()?,
            slot: f.slot()?,
        }),
        "cancel" => Input::Command(Command::Cancel {
            user: f.user()?,
            slot: f.slot()?,
        }),
        "pay" => Input::Command(Command::Pay {
            user: f.user()?,
            slot: f.slot()?,
            reference: Fields::text(&row.reference),
        }),
        "refund" => Input::Command(Command::Refund {
            user: f.user()?,
            slot: f.slot()?,
            reason: Fields::text(&row.reason),
        }),
        "create_game" => Input::Command(Command::CreateGame {
            user: f.user()?,
            slot: f.slot()?,
            kind: Fields::text(&row.kind).unwrap_or_else(|| "open".to_string()),
            min_players: f.require(&row.min, "min")?,
            max_players: f.require(&row.max, "max")?,
        }),
        "join_game" => Input::Command(Command::JoinGame {
            user: f.user()?,
            game: f.game()?,
        }),
        "leave_game" => Input::Command(Command::LeaveGame {
            user: f.user()?,
            game: f.game()?,
        }),
        "cancel_game" => Input::Command(Command::CancelGame {
            user: f.user()?,
            game: f.game()?,
        }),
        "join_waitlist" => Input::Command(Command::JoinWaitlist {
            user: f.user()?,
            game: f.game()?,
        }),
        "leave_waitlist" => Input::Command(Command::LeaveWaitlist {
            user: f.user()?,
            game: f.game()?,
        }),
        "invite" => Input::Command(Command::Invite {
            inviter: f.user()?,
            invited: f.require(&row.invitee, "invitee")?,
            game: f.game()?,
        }),
        "reconcile" => Input::Command(Command::Reconcile),
        other => {
            return Err(CsvError::UnrecognizedType {
                line,
                row_type: other.to_string(),
            });
        }
    };
    Ok(input)
}

/// Read a timestamped scenario from a csv file
pub fn read_scenario(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<Scheduled, CsvError>>, CsvError> {
    let path = path.as_ref();
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|source| CsvError::Open {
            path: path.display().to_string(),
            source,
        })?;

    Ok(reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            let input = parse_row(line, &row)?;
            Ok(Scheduled { at: row.at, input })
        }))
}

#[derive(Debug, Serialize)]
struct WalletRow {
    user: UserId,
    wallet: u64,
    balance: String,
}

#[derive(Debug, Serialize)]
struct SlotRow {
    slot: SlotId,
    court: CourtId,
    start: String,
    end: String,
    price: String,
    status: String,
    locked_by: Option<UserId>,
}

#[derive(Debug, Serialize)]
struct RefundRow {
    refund: u64,
    slot: SlotId,
    user: UserId,
    original: String,
    amount: String,
    percentage: u8,
    status: String,
    failure: Option<String>,
}

#[derive(Debug, Serialize)]
struct GameRow {
    game: GameId,
    slot: SlotId,
    kind: String,
    status: String,
    min: u32,
    max: u32,
    players: String,
}

/// Write wallet balances in csv format
pub fn write_wallets(
    out: impl io::Write,
    wallets: impl IntoIterator<Item = Wallet>,
) -> Result<(), CsvError> {
    write_rows(
        out,
        wallets.into_iter().map(|w| WalletRow {
            user: w.user_id,
            wallet: w.id,
            balance: w.balance.to_string(),
        }),
    )
}

/// Write slot states in csv format
pub fn write_slots(
    out: impl io::Write,
    slots: impl IntoIterator<Item = Slot>,
) -> Result<(), CsvError> {
    write_rows(
        out,
        slots.into_iter().map(|s| SlotRow {
            slot: s.id,
            court: s.court_id,
            start: s.start_time.to_rfc3339(),
            end: s.end_time.to_rfc3339(),
            price: s.price.to_string(),
            status: s.status.to_string(),
            locked_by: s.locked_by,
        }),
    )
}

/// Write refunds in csv format
pub fn write_refunds(
    out: impl io::Write,
    refunds: impl IntoIterator<Item = Refund>,
) -> Result<(), CsvError> {
    write_rows(
        out,
        refunds.into_iter().map(|r| RefundRow {
            refund: r.id,
            slot: r.slot_id,
            user: r.user_id,
            original: r.original_amount.to_string(),
            amount: r.refund_amount.to_string(),
            percentage: r.refund_percentage,
            status: r.status.to_string(),
            failure: r.failure_reason,
        }),
    )
}

/// Write games in csv format; players are space separated in join order
pub fn write_games(
    out: impl io::Write,
    games: impl IntoIterator<Item = Game>,
) -> Result<(), CsvError> {
    write_rows(
        out,
        games.into_iter().map(|g| GameRow {
            game: g.id,
            slot: g.slot_id,
            kind: g.kind,
            status: g.status.to_string(),
            min: g.min_players,
            max: g.max_players,
            players: g
                .players
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(" "),
        }),
    )
}

fn write_rows<R: Serialize>(
    out: impl io::Write,
    rows: impl IntoIterator<Item = R>,
) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(out);
    for row in rows {
        writer.serialize(&row)?;
    }
    writer.flush().map_err(csv::Error::from)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GameStatus, RefundStatus, SlotStatus};
    use chrono::TimeZone;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str = "at,type,user,slot,court,venue,game,discount,amount,percent,start,end,reference,reason,name,kind,min,max,rating,role,invitee";

    fn write_csv(rows: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{HEADER}").unwrap();
        for row in rows {
            writeln!(file, "{row}").unwrap();
        }
        file
    }

    fn read(rows: &[&str]) -> Vec<Result<Scheduled, CsvError>> {
        let file = write_csv(rows);
        read_scenario(file.path()).unwrap().collect()
    }

    fn time(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn read_lock_command() {
        let results = read(&["2026-05-01T12:00:00Z,lock,7,3,,,,,,,,,,,,,,,,,"]);
        assert_eq!(results.len(), 1);

        let row = results.into_iter().next().unwrap().unwrap();
        assert_eq!(row.at, time(12));
        match row.input {
            Input::Command(Command::Lock { user, slot }) => {
                assert_eq!(user, 7);
                assert_eq!(slot, 3);
            }
            other => panic!("expected lock, got {other:?}"),
        }
    }

    #[test]
    fn read_fixtures() {
        let results = read(&[
            "2026-05-01T08:00:00Z,court,,,2,1,,,40.5,,,,,,Centre,,,,,,",
            "2026-05-01T08:00:00Z,slot,,5,2,,,,40.5,,2026-05-02T18:00:00Z,2026-05-02T19:00:00Z,,,,,,,,,",
            "2026-05-01T08:00:00Z,discount,,,,1,,9,,15,2026-05-01T00:00:00Z,2026-05-10T00:00:00Z,,,,,,,,,",
            "2026-05-01T08:00:00Z,user,4,,,,,,,,,,,,Ana,,,,4.2,admin,",
        ]);
        let inputs: Vec<_> = results.into_iter().map(|r| r.unwrap().input).collect();

        match &inputs[0] {
            Input::Fixture(Fixture::Court(court)) => {
                assert_eq!(court.venue_id, 1);
                assert_eq!(court.base_price, Amount::from_float(40.5));
                assert_eq!(court.name, "Centre");
            }
            other => panic!("expected court, got {other:?}"),
        }
        match &inputs[1] {
            Input::Fixture(Fixture::Slot(slot)) => {
                assert_eq!(slot.id, 5);
                assert_eq!(slot.status, SlotStatus::Available);
            }
            other => panic!("expected slot, got {other:?}"),
        }
        match &inputs[2] {
            Input::Fixture(Fixture::Discount(discount)) => {
                assert_eq!(discount.scope, DiscountScope::Venue(1));
                assert_eq!(discount.rate, Factor::from_float(0.15));
            }
            other => panic!("expected discount, got {other:?}"),
        }
        match &inputs[3] {
            Input::Fixture(Fixture::User(user)) => {
                assert_eq!(user.rating, Some(4.2));
                assert_eq!(user.role, Role::Admin);
            }
            other => panic!("expected user, got {other:?}"),
        }
    }

    #[test]
    fn read_with_whitespace_and_empty_reference() {
        let results = read(&[" 2026-05-01T12:00:00Z , pay , 7 , 3 ,,,,,,,,,  ,,,,,,,,"]);
        match results.into_iter().next().unwrap().unwrap().input {
            Input::Command(Command::Pay { reference, .. }) => assert_eq!(reference, None),
            other => panic!("expected pay, got {other:?}"),
        }
    }

    #[test]
    fn read_returns_error_for_unknown_type() {
        let results = read(&["2026-05-01T12:00:00Z,teleport,7,3,,,,,,,,,,,,,,,,,"]);
        assert!(matches!(
            results[0],
            Err(CsvError::UnrecognizedType { line: 2, .. })
        ));
    }

    #[test]
    fn read_returns_error_for_missing_field() {
        let results = read(&[
            "2026-05-01T12:00:00Z,lock,7,,,,,,,,,,,,,,,,,,",
            "2026-05-01T12:00:00Z,invite,1,,,,4,,,,,,,,,,,,,,",
        ]);
        assert!(matches!(
            results[0],
            Err(CsvError::MissingField { field: "slot", .. })
        ));
        assert!(matches!(
            results[1],
            Err(CsvError::MissingField {
                line: 3,
                field: "invitee",
                ..
            })
        ));
    }

    #[test]
    fn read_returns_error_for_bad_timestamp() {
        let results = read(&["yesterday,lock,7,3,,,,,,,,,,,,,,,,,"]);
        assert!(matches!(results[0], Err(CsvError::Parse { line: 2, .. })));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(matches!(
            read_scenario("/nonexistent/scenario.csv"),
            Err(CsvError::Open { .. })
        ));
    }

    #[test]
    fn write_reports() {
        let mut out = Vec::new();
        write_wallets(
            &mut out,
            [Wallet {
                id: 1,
                user_id: 7,
                balance: Amount::from_float(880.0),
            }],
        )
        .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "user,wallet,balance\n7,1,880.0000\n"
        );

        let mut out = Vec::new();
        write_games(
            &mut out,
            [Game {
                id: 2,
                slot_id: 3,
                kind: "padel".into(),
                min_players: 2,
                max_players: 4,
                status: GameStatus::Confirmed,
                created_by: 1,
                players: vec![1, 5],
                created_at: time(12),
            }],
        )
        .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with("2,3,padel,confirmed,2,4,1 5\n"));

        let mut out = Vec::new();
        write_refunds(
            &mut out,
            [Refund {
                id: 1,
                transaction_id: 4,
                slot_id: 3,
                user_id: 7,
                original_amount: Amount::from_float(120.0),
                refund_amount: Amount::from_float(60.0),
                refund_percentage: 50,
                status: RefundStatus::Completed,
                reason: None,
                reference_id: "4".into(),
                failure_reason: None,
                created_at: time(12),
                processed_at: Some(time(13)),
            }],
        )
        .unwrap();
        assert!(String::from_utf8(out)
            .unwrap()
            .ends_with("1,3,7,120.0000,60.0000,50,completed,\n"));
    }
}
