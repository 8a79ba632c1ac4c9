use std::sync::Arc;
use std::time::Duration;

use boardsync::model::Board;
use boardsync::session::SessionEvent;
use boardsync::store::{BoardChanges, CardChanges, ListChanges};
use boardsync::{
    ApiError, Applied, CardDraft, ConfigError, ConnectionState, EntityId, HttpBoardApi, JsonFileStore, Notice,
    NoticeLevel, Session, SyncConfig, WsConnector,
};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// How long a one-shot command waits for the push transport before
/// dispatching anyway (the broadcast is then queued and dropped on exit).
const CONNECT_WAIT: Duration = Duration::from_secs(5);

/// Grace period for the socket task to flush outbound frames before exit.
const FLUSH_GRACE: Duration = Duration::from_millis(200);

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("invalid due date `{0}`; expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("board {0} could not be opened")]
    BoardNotOpen(EntityId),
    #[error("card {0} not found on this board")]
    UnknownCard(EntityId),
}

#[derive(Parser, Debug)]
#[command(name = "boardsync-cli", about = "Realtime board sync client")]
struct Cli {
    #[arg(long, env = "BOARDSYNC_API_URL")]
    api_url: Option<String>,

    #[arg(long, env = "BOARDSYNC_WS_URL")]
    ws_url: Option<String>,

    #[arg(long, env = "BOARDSYNC_TOKEN")]
    token: Option<String>,

    #[arg(long, help = "Print JSON instead of text")]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every board in the catalogue.
    Boards,
    /// Recently opened boards, newest first.
    Recent,
    /// Load and print one board.
    Show { board_id: EntityId },
    /// Open a board and stream remote changes until Ctrl-C.
    Watch { board_id: EntityId },
    Board(BoardCommand),
    List(ListCommand),
    Card(CardCommand),
}

#[derive(Args, Debug)]
struct BoardCommand {
    #[command(subcommand)]
    command: BoardSubcommand,
}

#[derive(Subcommand, Debug)]
enum BoardSubcommand {
    Create {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    Update {
        board_id: EntityId,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    Delete {
        board_id: EntityId,
    },
}

#[derive(Args, Debug)]
struct ListCommand {
    #[command(subcommand)]
    command: ListSubcommand,
}

#[derive(Subcommand, Debug)]
enum ListSubcommand {
    Create {
        board_id: EntityId,
        name: String,
    },
    Rename {
        board_id: EntityId,
        list_id: EntityId,
        name: String,
    },
    Delete {
        board_id: EntityId,
        list_id: EntityId,
    },
}

#[derive(Args, Debug)]
struct CardCommand {
    #[command(subcommand)]
    command: CardSubcommand,
}

#[derive(Subcommand, Debug)]
enum CardSubcommand {
    Create {
        board_id: EntityId,
        list_id: EntityId,
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, help = "Due date, YYYY-MM-DD")]
        due: Option<String>,
    },
    Update {
        board_id: EntityId,
        card_id: EntityId,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, help = "Due date, YYYY-MM-DD, or `none` to clear")]
        due: Option<String>,
    },
    Move {
        board_id: EntityId,
        card_id: EntityId,
        #[arg(long, help = "Target list id")]
        to: EntityId,
        #[arg(long, default_value_t = 0)]
        index: usize,
    },
    Delete {
        board_id: EntityId,
        card_id: EntityId,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    let mut config = SyncConfig::from_env()?;
    if let Some(api_url) = cli.api_url {
        config.api_url = api_url.trim_end_matches('/').to_owned();
    }
    if let Some(ws_url) = cli.ws_url {
        config.ws_url = ws_url.trim_end_matches('/').to_owned();
    }
    if cli.token.is_some() {
        config.token = cli.token;
    }

    let api = Arc::new(HttpBoardApi::from_config(&config)?);
    let storage = Box::new(JsonFileStore::new(config.recent_file.clone()));
    let (mut session, notices) = Session::new(config, api, Arc::new(WsConnector), storage);
    let printer = tokio::spawn(print_notices(notices));

    let result = run(&mut session, cli.command, cli.json).await;

    session.close_board();
    tokio::time::sleep(FLUSH_GRACE).await;
    drop(session);
    let _ = printer.await;
    result
}

async fn run(session: &mut Session, command: Command, json: bool) -> Result<(), CliError> {
    session.load_boards().await?;
    match command {
        Command::Boards => {
            let boards = session.store().catalogue().to_vec();
            if json {
                print_json(&serde_json::to_value(&boards)?)?;
            } else {
                for board in boards {
                    println!("{}\t{}\t{}", board.id, board.name, board.description);
                }
            }
            Ok(())
        }
        Command::Recent => {
            let limit = session.config().recent_limit;
            for board in session.recent_boards(limit) {
                println!("{}\t{}", board.id, board.name);
            }
            Ok(())
        }
        Command::Show { board_id } => {
            session.open_board(&board_id).await?;
            print_current(session, json)
        }
        Command::Watch { board_id } => watch(session, &board_id, json).await,
        Command::Board(board) => run_board(session, board).await,
        Command::List(list) => run_list(session, list).await,
        Command::Card(card) => run_card(session, card, json).await,
    }
}

async fn run_board(session: &mut Session, board: BoardCommand) -> Result<(), CliError> {
    match board.command {
        BoardSubcommand::Create { name, description } => {
            let summary = session.create_board(&name, &description).await?;
            println!("{}", summary.id);
        }
        BoardSubcommand::Update { board_id, name, description } => {
            open_and_wait(session, &board_id).await?;
            session.update_board(&board_id, BoardChanges { name, description }).await?;
        }
        BoardSubcommand::Delete { board_id } => {
            session.delete_board(&board_id).await?;
        }
    }
    Ok(())
}

async fn run_list(session: &mut Session, list: ListCommand) -> Result<(), CliError> {
    match list.command {
        ListSubcommand::Create { board_id, name } => {
            open_and_wait(session, &board_id).await?;
            if let Some(list) = session.add_list(&name).await? {
                println!("{}", list.id);
            }
        }
        ListSubcommand::Rename { board_id, list_id, name } => {
            open_and_wait(session, &board_id).await?;
            let changes = ListChanges { name: Some(name), position: None };
            session.update_list(&list_id, changes).await?;
        }
        ListSubcommand::Delete { board_id, list_id } => {
            open_and_wait(session, &board_id).await?;
            session.delete_list(&list_id).await?;
        }
    }
    Ok(())
}

async fn run_card(session: &mut Session, card: CardCommand, json: bool) -> Result<(), CliError> {
    match card.command {
        CardSubcommand::Create { board_id, list_id, title, description, due } => {
            open_and_wait(session, &board_id).await?;
            let draft = CardDraft {
                title,
                description,
                due_date: due.as_deref().map(parse_date).transpose()?,
                assignees: Vec::new(),
            };
            if let Some(card) = session.add_card(&list_id, draft).await? {
                if json {
                    print_json(&serde_json::to_value(&card)?)?;
                } else {
                    println!("{}", card.id);
                }
            }
        }
        CardSubcommand::Update { board_id, card_id, title, description, due } => {
            open_and_wait(session, &board_id).await?;
            let due_date = match due.as_deref() {
                None => None,
                Some("none") => Some(None),
                Some(raw) => Some(Some(parse_date(raw)?)),
            };
            let changes = CardChanges { title, description, due_date, ..CardChanges::default() };
            session.update_card(&card_id, changes).await?;
        }
        CardSubcommand::Move { board_id, card_id, to, index } => {
            open_and_wait(session, &board_id).await?;
            let source = session
                .store()
                .card(&card_id)
                .map(|(list, _)| list.id.clone())
                .ok_or_else(|| CliError::UnknownCard(card_id.clone()))?;
            session.move_card(&source, &to, &card_id, index).await?;
        }
        CardSubcommand::Delete { board_id, card_id } => {
            open_and_wait(session, &board_id).await?;
            session.delete_card(&card_id).await?;
        }
    }
    Ok(())
}

/// Open a board and give the transport a chance to connect so broadcasts
/// go out instead of sitting in the offline queue.
async fn open_and_wait(session: &mut Session, board_id: &EntityId) -> Result<(), CliError> {
    session.open_board(board_id).await?;
    if session.store().current_board_id() != Some(board_id) {
        return Err(CliError::BoardNotOpen(board_id.clone()));
    }
    let wait = async {
        while session.connection_state().is_transitional() {
            if session.next_event().await.is_none() {
                break;
            }
        }
    };
    if tokio::time::timeout(CONNECT_WAIT, wait).await.is_err()
        || session.connection_state() != ConnectionState::Connected
    {
        tracing::warn!(board_id = %board_id, "push transport not connected; continuing offline");
    }
    // Frames that arrived with the open must land before the mutation's
    // precondition checks read the store.
    let applied = session.process_pending();
    tracing::debug!(applied, "pending transport events applied");
    Ok(())
}

async fn watch(session: &mut Session, board_id: &EntityId, json: bool) -> Result<(), CliError> {
    session.open_board(board_id).await?;
    print_current(session, json)?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = session.next_event() => match event {
                Some(SessionEvent::Inbound(Applied::Changed { revision })) => {
                    tracing::debug!(revision, "remote change applied");
                    print_current(session, json)?;
                }
                Some(SessionEvent::State(state)) => eprintln!("[{}]", state.label()),
                Some(SessionEvent::Inbound(Applied::Unchanged(_)) | SessionEvent::Dropped | SessionEvent::Idle) => {}
                None => break,
            },
        }
    }
    Ok(())
}

fn print_current(session: &Session, json: bool) -> Result<(), CliError> {
    let Some(board) = session.store().current_board() else {
        return Ok(());
    };
    if json {
        print_json(&serde_json::to_value(board)?)
    } else {
        print_board(board);
        Ok(())
    }
}

fn print_board(board: &Board) {
    println!("{} ({})", board.name, board.id);
    for list in &board.lists {
        println!("  [{}] ({})", list.name, list.id);
        for card in &list.cards {
            let mut line = format!("    - {} ({})", card.title, card.id);
            if let Some(due) = card.due_date {
                line.push_str(&format!(" due {due}"));
            }
            if !card.labels.is_empty() {
                let labels: Vec<&str> = card.labels.iter().map(String::as_str).collect();
                line.push_str(&format!(" #{}", labels.join(" #")));
            }
            for user in &card.assignees {
                line.push_str(&format!(" @{}", user.name));
            }
            println!("{line}");
        }
    }
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

fn parse_date(raw: &str) -> Result<NaiveDate, CliError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| CliError::InvalidDate(raw.to_owned()))
}

async fn print_notices(mut notices: mpsc::UnboundedReceiver<Notice>) {
    while let Some(notice) = notices.recv().await {
        match notice.level {
            NoticeLevel::Success | NoticeLevel::Info => eprintln!("{}", notice.message),
            NoticeLevel::Error => eprintln!("error: {}", notice.message),
        }
    }
}
