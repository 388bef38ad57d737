//! MoonSQL - CLI driver
//!
//! Runs SQL from a file or argument, or starts an interactive shell.
//! `--show` selects which pipeline artifact to print for each statement:
//! tokens, AST, semantic resolution, plan JSON, or the executed result.

use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use clap::{Arg, Command};
use tracing_subscriber::{fmt, EnvFilter};

use moonsql::error::Error;
use moonsql::sql::{Lexer, Parser};
use moonsql::storage::{PolicyKind, Row};
use moonsql::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Show {
    Token,
    Ast,
    Sem,
    Plan,
    Result,
}

impl Show {
    fn parse(s: &str) -> Result<Show, String> {
        match s {
            "token" => Ok(Show::Token),
            "ast" => Ok(Show::Ast),
            "sem" => Ok(Show::Sem),
            "plan" => Ok(Show::Plan),
            "result" => Ok(Show::Result),
            other => Err(format!(
                "unknown view '{}', expected token|ast|sem|plan|result",
                other
            )),
        }
    }
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_writer(io::stderr).init();

    let matches = Command::new("moonsql")
        .about("A small disk-backed relational database engine")
        .arg(
            Arg::new("data")
                .long("data")
                .value_name("DIR")
                .default_value("data")
                .help("Data directory for table files and the catalog"),
        )
        .arg(
            Arg::new("show")
                .long("show")
                .value_name("VIEW")
                .default_value("result")
                .help("Artifact to print per statement: token|ast|sem|plan|result"),
        )
        .arg(
            Arg::new("file")
                .long("file")
                .value_name("FILE")
                .help("Execute a SQL script file"),
        )
        .arg(
            Arg::new("buffer-pages")
                .long("buffer-pages")
                .value_name("N")
                .default_value("64")
                .help("Buffer pool capacity in pages"),
        )
        .arg(
            Arg::new("policy")
                .long("policy")
                .value_name("POLICY")
                .default_value("lru")
                .help("Buffer replacement policy: lru|fifo"),
        )
        .arg(Arg::new("sql").value_name("SQL").help("SQL text to execute"))
        .get_matches();

    let show = match Show::parse(matches.get_one::<String>("show").unwrap()) {
        Ok(show) => show,
        Err(msg) => {
            eprintln!("{}", msg);
            return ExitCode::from(2);
        }
    };
    let capacity = match matches.get_one::<String>("buffer-pages").unwrap().parse() {
        Ok(n) if n > 0 => n,
        _ => {
            eprintln!("--buffer-pages must be a positive integer");
            return ExitCode::from(2);
        }
    };
    let policy: PolicyKind = match matches.get_one::<String>("policy").unwrap().parse() {
        Ok(policy) => policy,
        Err(msg) => {
            eprintln!("{}", msg);
            return ExitCode::from(2);
        }
    };

    let data_dir = matches.get_one::<String>("data").unwrap();
    let mut db = match Database::open_with(data_dir, capacity, policy) {
        Ok(db) => db,
        Err(e) => return report(&e),
    };

    let script = match (
        matches.get_one::<String>("file"),
        matches.get_one::<String>("sql"),
    ) {
        (Some(path), _) => match std::fs::read_to_string(path) {
            Ok(text) => Some(text),
            Err(e) => return report(&Error::Io(e)),
        },
        (None, Some(sql)) => Some(sql.clone()),
        (None, None) => None,
    };

    match script {
        Some(sql) => match process_script(&mut db, &sql, show) {
            Ok(()) => ExitCode::SUCCESS,
            Err(code) => code,
        },
        None => interactive(&mut db, show),
    }
}

/// Print one boundary error record and map it to an exit code
fn report(error: &Error) -> ExitCode {
    eprintln!("{}", error.to_report());
    ExitCode::from(error.exit_code() as u8)
}

/// Run a whole script under the chosen view; first error aborts
fn process_script(db: &mut Database, sql: &str, show: Show) -> Result<(), ExitCode> {
    let tokens = Lexer::new(sql).tokenize().map_err(|errors| {
        for e in &errors {
            eprintln!("{}", e.to_report());
        }
        ExitCode::from(2)
    })?;

    if show == Show::Token {
        for token in &tokens {
            println!(
                "{:>4}:{:<4} {:<14} {}",
                token.line,
                token.col,
                token.kind.category(),
                token
            );
        }
        return Ok(());
    }

    let statements = Parser::new(tokens).parse_all().map_err(|errors| {
        for e in &errors {
            eprintln!("{}", e.to_report());
        }
        ExitCode::from(2)
    })?;

    for statement in statements {
        show_statement(db, statement, show).map_err(|e| report(&e))?;
    }
    Ok(())
}

fn show_statement(
    db: &mut Database,
    statement: moonsql::sql::Statement,
    show: Show,
) -> Result<(), Error> {
    match show {
        Show::Token => unreachable!("handled before parsing"),
        Show::Ast => {
            println!("{:#?}", statement);
        }
        Show::Sem => {
            let checked = db.analyze(statement)?;
            let json = serde_json::to_string_pretty(&checked.info)
                .map_err(|e| Error::Internal(e.to_string()))?;
            println!("{}", json);
        }
        Show::Plan => {
            let plan = db.plan(statement)?;
            println!("{}", plan.to_json()?);
        }
        Show::Result => {
            let plan = db.plan(statement)?;
            let result = db.execute(&plan)?;
            if result.is_row_set() {
                print!("{}", format_rows(&result.columns, &result.rows));
                println!("({} rows)", result.rows.len());
            } else {
                println!("OK ({})", result.affected_rows);
            }
        }
    }
    Ok(())
}

/// Format query results as an ASCII table
fn format_rows(columns: &[String], rows: &[Row]) -> String {
    let mut widths: Vec<usize> = columns.iter().map(|c| c.len()).collect();
    for row in rows {
        for (i, value) in row.values().iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(value.to_string().len());
            }
        }
    }

    let separator: String = widths
        .iter()
        .map(|w| "-".repeat(*w + 2))
        .collect::<Vec<_>>()
        .join("+");
    let separator = format!("+{}+\n", separator);

    let mut output = String::new();
    output.push_str(&separator);
    let header: String = columns
        .iter()
        .zip(&widths)
        .map(|(c, w)| format!(" {:^width$} ", c, width = *w))
        .collect::<Vec<_>>()
        .join("|");
    output.push_str(&format!("|{}|\n", header));
    output.push_str(&separator);

    for row in rows {
        let row_str: String = row
            .values()
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!(" {:>width$} ", v.to_string(), width = *w))
            .collect::<Vec<_>>()
            .join("|");
        output.push_str(&format!("|{}|\n", row_str));
    }
    output.push_str(&separator);
    output
}

fn print_banner() {
    println!(
        r#"
MoonSQL - a small disk-backed relational database engine
Type '.help' for help, '.quit' to exit
"#
    );
}

fn print_help() {
    println!(
        r#"
Commands:
  .help              Show this help message
  .tables            List all tables
  .schema <table>    Show table schema
  .stats             Show buffer pool statistics
  .quit              Exit MoonSQL

SQL statements (terminated by ';'):
  CREATE TABLE s(id INT PRIMARY KEY, name VARCHAR(16), age INT);
  INSERT INTO s VALUES (1,'ann',20),(2,'bob',17);
  SELECT id, name FROM s WHERE age > 18;
  DELETE FROM s WHERE id = 2;
"#
    );
}

/// Interactive shell: reads statements until `;`, meta commands start
/// with `.`
fn interactive(db: &mut Database, show: Show) -> ExitCode {
    print_banner();

    let stdin = io::stdin();
    let mut buffer = String::new();

    loop {
        if buffer.is_empty() {
            print!("moonsql> ");
        } else {
            print!("     ..> ");
        }
        io::stdout().flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}", Error::Io(e).to_report());
                break;
            }
        }

        let trimmed = line.trim();
        if buffer.is_empty() && trimmed.starts_with('.') {
            match handle_meta_command(db, trimmed) {
                MetaOutcome::Continue => continue,
                MetaOutcome::Quit => break,
            }
        }

        buffer.push_str(&line);
        if !buffer.trim_end().ends_with(';') {
            continue;
        }

        let sql = std::mem::take(&mut buffer);
        // Errors are already printed; the shell keeps going.
        let _ = process_script(db, &sql, show);
    }

    ExitCode::SUCCESS
}

enum MetaOutcome {
    Continue,
    Quit,
}

fn handle_meta_command(db: &mut Database, command: &str) -> MetaOutcome {
    let mut parts = command.split_whitespace();
    match parts.next() {
        Some(".quit") | Some(".exit") => return MetaOutcome::Quit,
        Some(".help") => print_help(),
        Some(".tables") => {
            for table in db.catalog().list_tables() {
                println!("{}", table);
            }
        }
        Some(".schema") => match parts.next() {
            Some(table) => match db.catalog().describe_table(table) {
                Some(info) => print!("{}", info),
                None => println!("no such table: {}", table),
            },
            None => println!("usage: .schema <table>"),
        },
        Some(".stats") => match serde_json::to_string_pretty(&db.buffer_stats()) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("{}", e),
        },
        _ => println!("unknown command: {} (try '.help')", command),
    }
    MetaOutcome::Continue
}
