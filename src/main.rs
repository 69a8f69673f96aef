//!
//! Dojo portal shell
//! -----------------
//! Interactive front for the portal's auth core: sign in and out against the hosted auth
//! service, inspect the resolved role, and see what each portal route would show.

use std::sync::Arc;

use anyhow::Result;
use chrono::Datelike;
use rustyline::error::ReadlineError;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use dojo_portal::api::ApiClient;
use dojo_portal::config::PortalConfig;
use dojo_portal::identity::{AuthContext, GoTrueProvider, MemoryProvider, Role, StaticRoleBackend};
use dojo_portal::routes::{Navigation, SiteMap};

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [--offline]\n\nCommands:\n  login <email> <password>   sign in\n  logout                     sign out\n  whoami                     show identity and role\n  role refresh               fetch the role again\n  visit <path>               show what a route renders for you\n  routes                     list portal routes\n  calendar <year> <month>    public calendar events\n  belts                      all belts (signed in)\n  help                       show this help\n  quit | exit                leave the shell\n\nEnvironment:\n  DOJO_AUTH_URL, DOJO_AUTH_ANON_KEY, DOJO_API_URL, DOJO_SESSION_FILE,\n  DOJO_LOGIN_PATH, DOJO_MEMBER_HOME, DOJO_HTTP_TIMEOUT_SECS, RUST_LOG"
    );
}

fn offline_context() -> Arc<AuthContext> {
    let provider = MemoryProvider::new();
    let backend = StaticRoleBackend::new();
    for (email, pw, role) in [
        ("admin@dojo.test", "admin", Role::Admin),
        ("sensei@dojo.test", "sensei", Role::Instructor),
        ("student@dojo.test", "student", Role::User),
    ] {
        provider.add_account(email, pw);
        backend.set(email, dojo_portal::identity::StaticRole::Role(role));
    }
    AuthContext::new(Arc::new(provider), Arc::new(backend))
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let mut args: Vec<String> = std::env::args().collect();
    let program = args.remove(0);
    let mut offline = false;
    for a in &args {
        match a.as_str() {
            "--offline" => offline = true,
            "-h" | "--help" => { print_usage(&program); return Ok(()); }
            unk => {
                eprintln!("Unrecognized argument: {unk}");
                print_usage(&program);
                std::process::exit(2);
            }
        }
    }

    let cfg = PortalConfig::from_env()?;
    info!(
        target: "dojo",
        "Dojo portal starting: auth_url='{}', api_url='{}', session_file={:?}, offline={}",
        cfg.auth_url, cfg.api_url, cfg.session_file, offline
    );

    let api = ApiClient::new(&cfg)?;
    let ctx = if offline {
        offline_context()
    } else {
        AuthContext::new(Arc::new(GoTrueProvider::new(&cfg)?), Arc::new(api.clone()))
    };
    let events = ctx.start().await?;
    ctx.role_settled().await;

    let result = repl(&ctx, &api, &cfg, offline).await;
    events.unsubscribe();
    result
}

async fn repl(ctx: &AuthContext, api: &ApiClient, cfg: &PortalConfig, offline: bool) -> Result<()> {
    let map = SiteMap::portal();
    let mut rl = rustyline::DefaultEditor::new()?;
    loop {
        let line = match tokio::task::block_in_place(|| rl.readline("dojo> ")) {
            Ok(l) => l,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let line = line.trim();
        if line.is_empty() { continue; }
        let _ = rl.add_history_entry(line);
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            ["quit"] | ["exit"] => break,
            ["help"] => print_usage("dojo_portal"),
            ["login", email, password] => match ctx.sign_in(email, password).await {
                Ok(s) => {
                    let role = ctx.role_settled().await;
                    println!("signed in as {} (role: {})", s.identity.display_name(), role.map(|r| r.as_str()).unwrap_or("unknown"));
                }
                Err(e) => println!("error: {e}"),
            },
            ["logout"] => match ctx.sign_out().await {
                Ok(()) => println!("signed out"),
                Err(e) => println!("error: {e}"),
            },
            ["whoami"] => {
                let st = ctx.state();
                match &st.identity {
                    Some(id) => println!(
                        "{} ({}) role={}{}",
                        id.display_name(),
                        id.id,
                        st.role.map(|r| r.as_str()).unwrap_or("unknown"),
                        if st.role_loading { " (checking)" } else { "" }
                    ),
                    None if st.session_loading => println!("loading..."),
                    None => println!("not signed in"),
                }
            }
            ["role", "refresh"] => {
                let role = ctx.refetch_role().await;
                println!("role: {}", role.map(|r| r.as_str()).unwrap_or("unknown"));
            }
            ["visit", path] => match map.navigate(path, &ctx.state(), cfg) {
                Navigation::Render(r) => println!("{} [{:?}]", r.title, r.area),
                Navigation::Redirect(to) => println!("redirect -> {to}"),
                Navigation::Placeholder(text) => println!("{text}"),
                Navigation::NotFound => println!("no such page: {path}"),
            },
            ["routes"] => {
                for r in map.routes() {
                    let guard = match r.guard {
                        None => "public".to_string(),
                        Some(g) => match g.min_role {
                            None => "signed in".to_string(),
                            Some(role) => format!("role >= {role}"),
                        },
                    };
                    println!("{:<24} {:<20} {}", r.pattern, r.title, guard);
                }
            }
            ["calendar", year, month] if !offline => {
                let (Ok(y), Ok(m)) = (year.parse::<i32>(), month.parse::<u32>()) else {
                    println!("usage: calendar <year> <month>");
                    continue;
                };
                print_json(api.get_calendar_events(y, m).await);
            }
            ["calendar"] if !offline => {
                let today = chrono::Local::now().date_naive();
                print_json(api.get_calendar_events(today.year(), today.month()).await);
            }
            ["belts"] if !offline => {
                let session = ctx.session();
                match api.signed_in(session.as_ref()) {
                    Ok(authed) => print_json(authed.get_all_belts().await),
                    Err(e) => println!("error: {e}"),
                }
            }
            ["calendar", ..] | ["belts"] => println!("not available offline"),
            _ => println!("unknown command; try 'help'"),
        }
    }
    Ok(())
}

fn print_json(res: Result<serde_json::Value, dojo_portal::error::ApiError>) {
    match res {
        Ok(v) => println!("{}", serde_json::to_string_pretty(&v).unwrap_or_else(|_| v.to_string())),
        Err(e) => println!("error: {e}"),
    }
}
