//! Operator menu for the server.

use rollcall_server::{DispatchReport, Dispatcher, Recipient, ServerResult};

/// Printed at startup and on `help`.
pub const MENU: &str = "\
Available tasks:
  1 <client> <ssn>   Send a specific personnel to a specific client
  2 <ssn>            Send a specific personnel to all clients
  3 [client]         Send all personnel to all clients (or to one)
  4 <client> <ssn>   Delete a specific personnel from a specific client
  5 <ssn>            Delete a specific personnel from all clients
  6 [client]         Delete all personnel from all clients (or from one)
  7                  Exit
  list               Show connected clients
  help               Show this menu";

/// One parsed operator line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Task 1.
    SendOne { client: String, ssn: String },
    /// Task 2.
    SendAll { ssn: String },
    /// Task 3; `None` means every client.
    SendAllPersonnel { client: Option<String> },
    /// Task 4.
    DeleteOne { client: String, ssn: String },
    /// Task 5.
    DeleteFromAll { ssn: String },
    /// Task 6; `None` means every client.
    DeleteAll { client: Option<String> },
    /// Task 7.
    Exit,
    /// Show connected clients.
    List,
    /// Show the menu.
    Help,
}

/// Parses one line of operator input.
pub fn parse(line: &str) -> Result<Task, String> {
    let mut words = line.split_whitespace();
    let Some(task) = words.next() else {
        return Ok(Task::Help);
    };
    let args: Vec<String> = words.map(str::to_string).collect();

    let task = match (task.to_ascii_lowercase().as_str(), args.as_slice()) {
        ("1", [client, ssn]) => Task::SendOne {
            client: client.clone(),
            ssn: ssn.clone(),
        },
        ("2", [ssn]) => Task::SendAll { ssn: ssn.clone() },
        ("3", []) => Task::SendAllPersonnel { client: None },
        ("3", [client]) => Task::SendAllPersonnel {
            client: Some(client.clone()),
        },
        ("4", [client, ssn]) => Task::DeleteOne {
            client: client.clone(),
            ssn: ssn.clone(),
        },
        ("5", [ssn]) => Task::DeleteFromAll { ssn: ssn.clone() },
        ("6", []) => Task::DeleteAll { client: None },
        ("6", [client]) => Task::DeleteAll {
            client: Some(client.clone()),
        },
        ("7" | "exit" | "quit", []) => Task::Exit,
        ("list", []) => Task::List,
        ("help" | "?", []) => Task::Help,
        ("1" | "4", _) => return Err(format!("usage: {task} <client> <ssn>")),
        ("2" | "5", _) => return Err(format!("usage: {task} <ssn>")),
        ("3" | "6", _) => return Err(format!("usage: {task} [client]")),
        _ => return Err(format!("invalid task {task:?}; type help for the menu")),
    };
    Ok(task)
}

/// Runs a dispatching task. `Exit`, `List` and `Help` are handled by the
/// caller and return `None`.
pub async fn execute(dispatcher: &Dispatcher, task: &Task) -> Option<ServerResult<DispatchReport>> {
    let result = match task {
        Task::SendOne { client, ssn } => dispatcher.send_one(client, ssn).await,
        Task::SendAll { ssn } => dispatcher.send_all(ssn).await,
        Task::SendAllPersonnel { client: None } => dispatcher.send_save_all(&Recipient::All).await,
        Task::SendAllPersonnel {
            client: Some(client),
        } => dispatcher.send_all_personnel(client).await,
        Task::DeleteOne { client, ssn } => dispatcher.delete_one(client, ssn).await,
        Task::DeleteFromAll { ssn } => dispatcher.delete_from_all(ssn).await,
        Task::DeleteAll { client: None } => dispatcher.delete_all_from_all().await,
        Task::DeleteAll {
            client: Some(client),
        } => dispatcher.delete_all_from_one(client).await,
        Task::Exit | Task::List | Task::Help => return None,
    };
    Some(result)
}

/// Renders a dispatch report for the operator.
pub fn describe(report: &DispatchReport) -> String {
    if report.attempted() == 0 {
        return format!("{}: no clients connected", report.action);
    }

    let mut out = format!(
        "{}: delivered to {} of {}",
        report.action,
        report.delivered.len(),
        report.attempted()
    );
    for (client, failure) in &report.failed {
        out.push_str(&format!("\n  {} failed: {}", client.display_name, failure));
    }
    out
}
