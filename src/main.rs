use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::time::Duration;

use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use memo::config::{self, Settings};
use memo::db::Database;
use memo::models::{
    AdaptiveState, FixedState, Grade, IntervalMultiplierType, JsonOutput, Schedule,
};
use memo::practice::{latest_schedule, practice, PracticeOptions, ReviewSession};
use memo::ranking::{self, deck_offset_changes, deck_priority, PriorityStore};
use memo::records::{self, load_records};
use memo::scheduler::preview_intervals;

#[derive(Parser)]
#[command(name = "memo")]
#[command(about = "Spaced-repetition flashcards with a shared priority ranking")]
#[command(version)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Log debug output to stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Manage cards
    #[command(subcommand)]
    Card(CardCommands),

    /// List all tags (decks)
    Tags,

    /// Show today's review queue
    Today {
        /// Ignore due dates and the daily limit
        #[arg(long)]
        cram: bool,
    },

    /// Review today's queue interactively
    Study {
        /// Ignore due dates and the daily limit, save nothing
        #[arg(long)]
        cram: bool,
    },

    /// Record a review for a single card
    Review {
        /// Card uid
        uid: String,

        /// Grade 0-5, or forgot/hard/good/perfect
        #[arg(long, short)]
        grade: String,

        /// Switch to a fixed interval of N units
        #[arg(long)]
        every: Option<u32>,

        /// Unit for --every: days/weeks/months/years
        #[arg(long, default_value = "days")]
        unit: String,

        /// Switch back to adaptive scheduling
        #[arg(long, conflicts_with = "every")]
        adaptive: bool,

        /// Compute without saving
        #[arg(long)]
        dry_run: bool,
    },

    /// Show a card's review history
    History {
        /// Card uid
        uid: String,
    },

    /// Show or change a card's priority rank
    Rank {
        /// Card uid
        uid: String,

        /// Move the card to this rank (1 = highest priority)
        #[arg(long)]
        set: Option<usize>,
    },

    /// Show the full priority ranking
    Rankings,

    /// Show median priority per deck
    Decks,

    /// Shift every card of a deck by a priority offset (percentage points)
    DeckOffset {
        tag: String,

        #[arg(allow_hyphen_values = true)]
        offset: i32,
    },

    /// Add newly tagged cards to the priority ranking
    Sync,
}

#[derive(Subcommand)]
enum CardCommands {
    /// Add a card to one or more tags
    Add {
        /// Card uid
        uid: String,

        /// Comma-separated tags
        #[arg(long, short)]
        tags: Option<String>,
    },

    /// List cards
    List {
        /// Filter by tag
        #[arg(long, short)]
        tag: Option<String>,
    },

    /// Remove a card from all tags and delete its history
    Remove {
        /// Card uid
        uid: String,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "memo=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn print_json<T: serde::Serialize>(data: T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string(&JsonOutput::ok(data))?);
    Ok(())
}

fn parse_grade(raw: &str) -> Result<i64, String> {
    if let Ok(v) = raw.trim().parse::<i64>() {
        return Ok(v);
    }
    Grade::from_str(raw)
        .map(|g| g.value() as i64)
        .ok_or_else(|| format!("Invalid grade '{}'. Use 0-5 or forgot/hard/good/perfect", raw))
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load(config::config_path())?;
    let db_path = config::db_path();
    let db = Database::open(&db_path)?;
    db.init()?;
    let today = Local::now().date_naive();
    let page = settings.data_page_title.as_str();

    match cli.command {
        Commands::Init => {
            if cli.json {
                print_json(())?;
            } else {
                println!("Database initialized at: {}", db_path.display());
            }
        }

        Commands::Card(card_cmd) => match card_cmd {
            CardCommands::Add { uid, tags } => {
                let tag_list: Vec<String> = tags
                    .map(|t| t.split(',').map(|s| s.trim().to_string()).collect())
                    .unwrap_or_else(|| settings.tags.clone());
                db.add_card(&uid, &tag_list)?;

                if cli.json {
                    print_json(serde_json::json!({ "uid": uid, "tags": tag_list }))?;
                } else {
                    println!("Added card '{}' to: {}", uid, tag_list.join(", "));
                }
            }

            CardCommands::List { tag } => {
                let cards = db.list_cards(tag.as_deref())?;
                let order = PriorityStore::new(&db, page).load();
                if cli.json {
                    print_json(&cards)?;
                } else if cards.is_empty() {
                    println!("No cards found.");
                } else {
                    println!("{:<6} {:<30} TAGS", "RANK", "UID");
                    println!("{}", "-".repeat(60));
                    for uid in cards {
                        println!(
                            "{:<6} {:<30} {}",
                            ranking::rank(&uid, &order),
                            truncate(&uid, 28),
                            db.card_tags(&uid)?.join(", ")
                        );
                    }
                }
            }

            CardCommands::Remove { uid } => {
                let removed = db.remove_card(&uid)?;
                records::delete_history(&db, page, &uid)?;
                if cli.json {
                    if removed {
                        print_json(())?;
                    } else {
                        println!(
                            "{}",
                            serde_json::to_string(&JsonOutput::<()>::err("Card not found"))?
                        );
                    }
                } else if removed {
                    println!("Card {} removed.", uid);
                } else {
                    println!("Card not found.");
                }
            }
        },

        Commands::Tags => {
            let tags = db.list_tags()?;
            if cli.json {
                print_json(&tags)?;
            } else if tags.is_empty() {
                println!("No tags found.");
            } else {
                println!("{:<30} CARDS", "TAG");
                println!("{}", "-".repeat(40));
                for tag in tags {
                    println!("{:<30} {}", tag.name, tag.card_count);
                }
            }
        }

        Commands::Today { cram } => {
            let options = PracticeOptions {
                cramming: cram,
                dry_run: false,
            };
            let session = ReviewSession::start(&db, settings.clone(), today, options)?;
            let data = session.data();

            if cli.json {
                print_json(&data.today)?;
            } else {
                println!("=== Today ({}) ===", today);
                println!("{:<20} {:>5} {:>5} {:>6}  STATUS", "TAG", "DUE", "NEW", "DONE");
                println!("{}", "-".repeat(55));
                for tag in &data.today.tags {
                    println!(
                        "{:<20} {:>5} {:>5} {:>6}  {}",
                        truncate(&tag.tag, 18),
                        tag.due,
                        tag.new,
                        tag.completed_due + tag.completed_new,
                        tag.status.label()
                    );
                }
                let c = &data.today.combined;
                println!("{}", "-".repeat(55));
                println!(
                    "{:<20} {:>5} {:>5} {:>6}  {}",
                    "total",
                    c.due,
                    c.new,
                    c.completed_due + c.completed_new,
                    c.status.label()
                );
            }
        }

        Commands::Study { cram } => {
            let options = PracticeOptions {
                cramming: cram,
                dry_run: false,
            };
            let mut session = ReviewSession::start(&db, settings.clone(), today, options)?;
            study(&mut session)?;
        }

        Commands::Review {
            uid,
            grade,
            every,
            unit,
            adaptive,
            dry_run,
        } => {
            let grade = parse_grade(&grade)?;
            let history = load_records(&db, page)?;
            let previous = match (every, adaptive) {
                (Some(multiplier), _) => {
                    let unit = IntervalMultiplierType::from_str(&unit)
                        .ok_or_else(|| format!("Invalid unit '{}'", unit))?;
                    Schedule::Fixed(FixedState {
                        interval_multiplier: multiplier.max(1),
                        interval_multiplier_type: unit,
                    })
                }
                (None, true) => match latest_schedule(&history, &uid) {
                    adaptive @ Schedule::Adaptive(_) => adaptive,
                    Schedule::Fixed(_) => Schedule::Adaptive(AdaptiveState::default()),
                },
                (None, false) => latest_schedule(&history, &uid),
            };

            let options = PracticeOptions {
                cramming: false,
                dry_run,
            };
            let session = practice(&db, page, &uid, &previous, grade, today, options)?;

            if cli.json {
                print_json(&session)?;
            } else {
                println!("Review recorded for card {}.", uid);
                if let Schedule::Adaptive(state) = session.schedule {
                    println!(
                        "Interval: {} day(s), repetitions: {}, ease: {:.2}",
                        state.interval, state.repetitions, state.ease_factor
                    );
                }
                if let Some(next) = session.next_due_date {
                    println!("Next review scheduled: {}", next);
                }
                if dry_run {
                    println!("(dry run, nothing saved)");
                }
            }
        }

        Commands::History { uid } => {
            let history = load_records(&db, page)?;
            let sessions = history.get(&uid).cloned().unwrap_or_default();
            if cli.json {
                print_json(&sessions)?;
            } else if sessions.is_empty() {
                println!("No reviews recorded for {}.", uid);
            } else {
                println!("{:<12} {:<6} {:<16} NEXT DUE", "DATE", "GRADE", "MODE");
                println!("{}", "-".repeat(50));
                for s in sessions {
                    println!(
                        "{:<12} {:<6} {:<16} {}",
                        s.date_created.to_string(),
                        s.grade.map(|g| g.value().to_string()).unwrap_or_else(|| "-".into()),
                        s.review_mode().as_str(),
                        s.next_due_date
                            .map(|d| d.to_string())
                            .unwrap_or_else(|| "-".into())
                    );
                }
            }
        }

        Commands::Rank { uid, set } => {
            let store = PriorityStore::new(&db, page);
            let order = match set {
                Some(target) => {
                    let fallback = db.all_card_ids(&settings.tags)?;
                    let changes: HashMap<_, _> = [(uid.clone(), target.max(1))].into_iter().collect();
                    store.apply_rank_changes(&changes, &fallback)?
                }
                None => store.load(),
            };
            let rank = ranking::rank(&uid, &order);

            if cli.json {
                print_json(serde_json::json!({ "uid": uid, "rank": rank, "total": order.len() }))?;
            } else {
                println!("{} is ranked {} of {}", uid, rank, order.len());
            }
        }

        Commands::Rankings => {
            let order = PriorityStore::new(&db, page).load();
            if cli.json {
                print_json(&order)?;
            } else if order.is_empty() {
                println!("No ranking yet. Run `memo sync` after adding cards.");
            } else {
                for (i, uid) in order.iter().enumerate() {
                    println!("{:>5}  {}", i + 1, uid);
                }
            }
        }

        Commands::Decks => {
            let order = PriorityStore::new(&db, page).load();
            let mut decks = Vec::new();
            for tag in db.list_tags()? {
                let cards = db.cards_for_tag(&tag.name)?;
                decks.push(deck_priority(&tag.name, &cards, &order));
            }
            decks.sort_by(|a, b| b.median_priority.cmp(&a.median_priority));

            if cli.json {
                print_json(&decks)?;
            } else if decks.is_empty() {
                println!("No decks found.");
            } else {
                println!("{:<30} {:>6} {:>8}", "DECK", "CARDS", "PRIORITY");
                println!("{}", "-".repeat(46));
                for d in decks {
                    println!("{:<30} {:>6} {:>7}%", d.tag, d.card_count, d.median_priority);
                }
            }
        }

        Commands::DeckOffset { tag, offset } => {
            let store = PriorityStore::new(&db, page);
            let cards = db.cards_for_tag(&tag)?;
            if cards.is_empty() {
                return Err(format!("Deck '{}' has no cards", tag).into());
            }
            let order = store.load();
            let changes = deck_offset_changes(&cards, &order, offset);
            let order = store.apply_rank_changes(&changes, &db.all_card_ids(&settings.tags)?)?;
            let deck = deck_priority(&tag, &cards, &order);

            if cli.json {
                print_json(&deck)?;
            } else {
                println!("Deck {} now at {}% median priority.", tag, deck.median_priority);
            }
        }

        Commands::Sync => {
            let mut store = PriorityStore::new(&db, page)
                .with_debounce(Duration::from_millis(settings.debounce_ms));
            let before = store.load().len();
            let all = db.all_card_ids(&settings.tags)?;
            let order = store.insert_missing(&all, settings.default_priority)?;

            if cli.json {
                print_json(serde_json::json!({
                    "inserted": order.len().saturating_sub(before),
                    "total": order.len()
                }))?;
            } else {
                println!(
                    "Added {} card(s) to the ranking ({} total).",
                    order.len().saturating_sub(before),
                    order.len()
                );
            }
        }
    }

    Ok(())
}

fn study(session: &mut ReviewSession<'_>) -> Result<(), Box<dyn std::error::Error>> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    println!(
        "{} card(s) to review. Grade with 0/2/4/5 (or forgot/hard/good/perfect),",
        session.remaining()
    );
    println!("`s` to skip, `r N` to set rank, `q` to quit.");

    while let Some(uid) = session.current().map(str::to_string) {
        let previous = latest_schedule(&session.data().records, &uid);
        println!();
        println!("Card: {}", uid);
        if let Some(rank) = session.current_rank() {
            println!("Rank: {} of {}", rank, session.data().all_card_uids.len());
        }
        if let Schedule::Adaptive(state) = previous {
            let [forgot, hard, good, perfect] = preview_intervals(&state);
            println!(
                "Next interval: forgot {}d, hard {}d, good {}d, perfect {}d",
                forgot, hard, good, perfect
            );
        }
        print!("> ");
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let input = line.trim();

        match input {
            "q" | "quit" => break,
            "s" | "skip" => session.skip()?,
            _ if input.starts_with("r ") => match input[2..].trim().parse::<usize>() {
                Ok(target) => {
                    session.set_rank(target);
                    println!("Rank will be set to {} when the session ends.", target);
                }
                Err(_) => println!("Usage: r <rank>"),
            },
            _ => match parse_grade(input) {
                Ok(grade) => match session.grade(grade) {
                    Ok(Some(result)) => {
                        if let Some(next) = result.next_due_date {
                            println!("Next review: {}", format_due(next, result.date_created));
                        }
                    }
                    Ok(None) => break,
                    Err(e) => println!("{}", e),
                },
                Err(e) => println!("{}", e),
            },
        }
    }

    session.finish()?;
    println!();
    println!("Session finished.");
    Ok(())
}

fn format_due(due: NaiveDate, from: NaiveDate) -> String {
    match (due - from).num_days() {
        0 => format!("{} (today)", due),
        1 => format!("{} (tomorrow)", due),
        n => format!("{} (in {} days)", due, n),
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod truncate_tests {
        use super::*;

        #[test]
        fn truncate_short_string() {
            assert_eq!(truncate("card-1", 10), "card-1");
        }

        #[test]
        fn truncate_long_string() {
            assert_eq!(truncate("abcdefghijk", 8), "abcde...");
        }

        #[test]
        fn truncate_multibyte() {
            assert_eq!(truncate("日本語のカード名", 6), "日本語...");
            assert_eq!(truncate("ñandú", 5), "ñandú");
        }

        #[test]
        fn truncate_tiny_limit() {
            assert_eq!(truncate("hello", 2), "...");
        }
    }

    mod grade_tests {
        use super::*;

        #[test]
        fn parse_grade_names_and_numbers() {
            assert_eq!(parse_grade("good"), Ok(4));
            assert_eq!(parse_grade("Perfect"), Ok(5));
            assert_eq!(parse_grade("3"), Ok(3));
            assert_eq!(parse_grade(" 0 "), Ok(0));
        }

        #[test]
        fn parse_grade_rejects_unknown_word() {
            assert!(parse_grade("meh").is_err());
        }

        #[test]
        fn out_of_range_number_is_left_to_scheduler() {
            assert_eq!(parse_grade("7"), Ok(7));
        }

        #[test]
        fn format_due_relative() {
            let from = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
            let next = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
            let later = NaiveDate::from_ymd_opt(2024, 1, 7).unwrap();
            assert_eq!(format_due(from, from), "2024-01-01 (today)");
            assert_eq!(format_due(next, from), "2024-01-02 (tomorrow)");
            assert_eq!(format_due(later, from), "2024-01-07 (in 6 days)");
        }
    }

    mod cli_parsing_tests {
        use super::*;

        #[test]
        fn parse_init_with_json() {
            let cli = Cli::try_parse_from(["memo", "--json", "init"]).unwrap();
            assert!(cli.json);
            assert!(matches!(cli.command, Commands::Init));
        }

        #[test]
        fn parse_card_add_with_tags() {
            let cli = Cli::try_parse_from(["memo", "card", "add", "abc", "-t", "spanish,rust"])
                .unwrap();
            match cli.command {
                Commands::Card(CardCommands::Add { uid, tags }) => {
                    assert_eq!(uid, "abc");
                    assert_eq!(tags, Some("spanish,rust".to_string()));
                }
                _ => panic!("Expected Card Add command"),
            }
        }

        #[test]
        fn parse_review_fixed_interval() {
            let cli = Cli::try_parse_from([
                "memo", "review", "x", "--grade", "4", "--every", "2", "--unit", "weeks",
            ])
            .unwrap();
            match cli.command {
                Commands::Review {
                    uid,
                    grade,
                    every,
                    unit,
                    adaptive,
                    dry_run,
                } => {
                    assert_eq!(uid, "x");
                    assert_eq!(grade, "4");
                    assert_eq!(every, Some(2));
                    assert_eq!(unit, "weeks");
                    assert!(!adaptive);
                    assert!(!dry_run);
                }
                _ => panic!("Expected Review command"),
            }
        }

        #[test]
        fn parse_review_defaults_unit_to_days() {
            let cli = Cli::try_parse_from(["memo", "review", "x", "-g", "good"]).unwrap();
            match cli.command {
                Commands::Review { unit, every, .. } => {
                    assert_eq!(unit, "days");
                    assert_eq!(every, None);
                }
                _ => panic!("Expected Review command"),
            }
        }

        #[test]
        fn parse_review_adaptive_conflicts_with_every() {
            let result = Cli::try_parse_from([
                "memo", "review", "x", "--grade", "4", "--every", "2", "--adaptive",
            ]);
            assert!(result.is_err());
        }

        #[test]
        fn parse_review_requires_grade() {
            assert!(Cli::try_parse_from(["memo", "review", "x"]).is_err());
        }

        #[test]
        fn parse_deck_offset_negative() {
            let cli = Cli::try_parse_from(["memo", "deck-offset", "spanish", "-10"]).unwrap();
            match cli.command {
                Commands::DeckOffset { tag, offset } => {
                    assert_eq!(tag, "spanish");
                    assert_eq!(offset, -10);
                }
                _ => panic!("Expected DeckOffset command"),
            }
        }

        #[test]
        fn parse_rank_set() {
            let cli = Cli::try_parse_from(["memo", "rank", "x", "--set", "3"]).unwrap();
            match cli.command {
                Commands::Rank { uid, set } => {
                    assert_eq!(uid, "x");
                    assert_eq!(set, Some(3));
                }
                _ => panic!("Expected Rank command"),
            }
        }

        #[test]
        fn parse_study_cram_with_verbose() {
            let cli = Cli::try_parse_from(["memo", "study", "--cram", "-v"]).unwrap();
            assert!(cli.verbose);
            assert!(matches!(cli.command, Commands::Study { cram: true }));
        }
    }

    mod path_tests {
        use super::*;
        use std::env;

        #[test]
        fn db_path_uses_env_var() {
            let test_path = "/tmp/test_memo.db";
            env::set_var("MEMO_DB", test_path);
            assert_eq!(config::db_path().to_str().unwrap(), test_path);

            env::remove_var("MEMO_DB");
            let path = config::db_path();
            assert!(path.to_str().unwrap().ends_with("memo.db"));
        }

        #[test]
        fn config_path_uses_env_var() {
            let test_path = "/tmp/test_memo.toml";
            env::set_var("MEMO_CONFIG", test_path);
            assert_eq!(config::config_path().to_str().unwrap(), test_path);

            env::remove_var("MEMO_CONFIG");
            let path = config::config_path();
            assert!(path.to_str().unwrap().ends_with("config.toml"));
        }
    }
}
