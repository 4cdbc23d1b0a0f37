//! BookSwap CLI - a command-line front end for the BookSwap API.
//!
//! Logs in, keeps the session between runs and lists books and members.

use std::io::{self, Write};

use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bookswap::config::Config;
use bookswap::models::{Book, LoginCredentials, RegisterData, User};
use bookswap::{ApiError, AuthContext, SessionEvent, SessionStore};

const USAGE: &str = "Usage: bookswap <command>

Commands:
  login [email]          Log in and store the session
  register               Create an account
  logout                 Forget the stored session
  whoami                 Show the signed-in user
  books [--search <q>]   List or search books
  book <id>              Show one book
  users                  List members
  user <id>              Show one member
  friends                Show friendships
  exchanges              Show book exchanges
  messages               Show messages";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

const SESSION_EXPIRED: &str = "Your session has expired. Run `bookswap login` to sign in again.";

/// Print a prompt to log in again whenever the server ends the session.
///
/// The task runs until every clone of the session store is dropped and hands
/// the writer back, so awaiting it guarantees all queued notices were printed.
fn watch_session<W>(session: &SessionStore, mut out: W) -> JoinHandle<W>
where
    W: Write + Send + 'static,
{
    let mut events = session.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Invalidated { .. }) => {
                    let _ = writeln!(out, "{}", SESSION_EXPIRED);
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
        out
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        eprintln!("{}", USAGE);
        return Ok(());
    };

    let config = Config::load()?;
    let session = config.session_store()?;
    let watcher = watch_session(&session, io::stderr());
    let auth = AuthContext::new(config.api_client(session)?);
    info!(api_url = %config.api_url, command, "BookSwap CLI starting");

    let result = run(&auth, command, &args[1..]).await;

    // Closing the last session handle ends the watcher once it has printed
    drop(auth);
    let _ = watcher.await;

    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            if let Some(api_err) = e.downcast_ref::<ApiError>() {
                print_api_error(api_err);
                std::process::exit(1);
            }
            Err(e)
        }
    }
}

async fn run(auth: &AuthContext, command: &str, rest: &[String]) -> Result<()> {
    let api = auth.api();
    match command {
        "login" => {
            let email = match rest.first() {
                Some(email) => email.clone(),
                None => prompt("Email: ")?,
            };
            let password = rpassword::prompt_password("Password: ")?;
            let user = auth.login(&LoginCredentials::new(email, password)).await?;
            println!("Logged in as {} ({})", user.full_name(), user.username);
        }
        "register" => {
            let data = RegisterData {
                email: prompt("Email: ")?,
                username: prompt("Username: ")?,
                first_name: prompt("First name: ")?,
                last_name: prompt("Last name: ")?,
                password: rpassword::prompt_password("Password: ")?,
                confirm_password: rpassword::prompt_password("Confirm password: ")?,
            };
            let user = auth.register(&data).await?;
            println!("Welcome, {}!", user.full_name());
        }
        "logout" => {
            auth.logout().await;
            println!("Logged out");
        }
        "whoami" => {
            auth.init().await;
            match auth.user().await {
                Some(user) => print_user(&user),
                None => println!("Not logged in"),
            }
        }
        "books" => {
            let books = match rest {
                [flag, query, ..] if flag == "--search" => api.search_books(query).await?,
                [flag] if flag == "--search" => anyhow::bail!("--search needs a query"),
                _ => api.get_books().await?,
            };
            if books.is_empty() {
                println!("No books found");
            }
            for book in &books {
                print_book_line(book);
            }
        }
        "book" => {
            let book = api.get_book(parse_id(rest)?).await?;
            print_book(&book);
        }
        "users" => {
            for user in api.get_users().await? {
                println!("{:>6}  {:<20} {}", user.id, user.username, user.full_name());
            }
        }
        "user" => {
            let user = api.get_user(parse_id(rest)?).await?;
            print_user(&user);
        }
        "friends" => print_json(&api.get_friendships().await?)?,
        "exchanges" => print_json(&api.get_exchanges().await?)?,
        "messages" => print_json(&api.get_messages().await?)?,
        "help" | "--help" | "-h" => println!("{}", USAGE),
        other => anyhow::bail!("Unknown command '{}'\n\n{}", other, USAGE),
    }
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    eprint!("{}", label);
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line).context("Failed to read input")?;
    Ok(line.trim().to_string())
}

fn parse_id(rest: &[String]) -> Result<i64> {
    let raw = rest.first().context("Missing id")?;
    raw.parse()
        .with_context(|| format!("Invalid id '{}'", raw))
}

fn print_api_error(err: &ApiError) {
    eprintln!("Error: {}", err.error);
    if let Some(details) = &err.details {
        let mut fields: Vec<_> = details.iter().collect();
        fields.sort_by(|a, b| a.0.cmp(b.0));
        for (field, messages) in fields {
            eprintln!("  {}: {}", field, messages.join("; "));
        }
    }
}

fn print_user(user: &User) {
    println!("{} (@{})", user.full_name(), user.username);
    println!("  Email:    {}", user.email);
    if !user.location.is_empty() {
        println!("  Location: {}", user.location);
    }
    if !user.bio.is_empty() {
        println!("  Bio:      {}", user.bio);
    }
    if let Some(joined) = user.joined() {
        println!("  Joined:   {}", joined.format("%Y-%m-%d"));
    }
}

fn print_book_line(book: &Book) {
    println!("{:>6}  {}", book.id, book.display_title());
}

fn print_book(book: &Book) {
    println!("{}", book.display_title());
    if let Some(isbn) = book.isbn() {
        println!("  ISBN:      {}", isbn);
    }
    if let Some(publisher) = &book.publisher {
        println!("  Publisher: {}", publisher.name);
    }
    if let Some(date) = &book.publication_date {
        println!("  Published: {}", date);
    }
    if !book.genres.is_empty() {
        let genres: Vec<_> = book.genres.iter().map(|g| g.name.as_str()).collect();
        println!("  Genres:    {}", genres.join(", "));
    }
    if let Some(description) = &book.description {
        println!("\n{}", description);
    }
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
