use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use apexd_core::{ApexFile, ApexImage, ApexdConfig, VerityData};
use apexd_session::SessionState;
use apexd_verity::prepare_hash_tree;
use clap::CommandFactory;
use clap_complete::Shell;

use crate::context::ApexdContext;
use crate::render::{
    current_output_style, format_session_details, format_session_line, render_status_line,
    OutputStyle, Spinner,
};
use crate::{Cli, Commands, HashtreeCommand, SessionsCommand};

pub(crate) fn run_cli(cli: Cli, config: ApexdConfig) -> Result<()> {
    let context = ApexdContext::new(config);
    let style = current_output_style();
    let lines = run_command(&context, style, cli.command)?;
    for line in lines {
        println!("{line}");
    }
    Ok(())
}

pub(crate) fn run_command(
    context: &ApexdContext,
    style: OutputStyle,
    command: Commands,
) -> Result<Vec<String>> {
    match command {
        Commands::Sessions(SessionsCommand::List { state }) => {
            run_sessions_list(context, style, state)
        }
        Commands::Sessions(SessionsCommand::Show { id }) => {
            let session = context.session_manager().get_session(id)?;
            Ok(format_session_details(style, &session))
        }
        Commands::Sessions(SessionsCommand::DeleteFinalized) => {
            run_sessions_delete_finalized(context, style)
        }
        Commands::Sessions(SessionsCommand::Migrate { from }) => {
            run_sessions_migrate(context, style, from.as_deref())
        }
        Commands::SessionsDir => Ok(vec![context
            .session_manager()
            .sessions_base_dir()
            .display()
            .to_string()]),
        Commands::Hashtree(HashtreeCommand::Prepare { bundle, target }) => {
            run_hashtree_prepare(context, style, &bundle, target.as_deref())
        }
        Commands::Hashtree(HashtreeCommand::Remove { package }) => {
            let removed = context.hashtree_manager().remove_hash_tree(&package)?;
            let (label, message) = if removed {
                ("ok", format!("removed hashtree of {package}"))
            } else {
                ("skip", format!("no hashtree for {package}"))
            };
            Ok(vec![render_status_line(style, label, &message)])
        }
        Commands::Completion { shell } => {
            let mut generated = Vec::new();
            write_completions(shell, &mut generated)?;
            Ok(vec![String::from_utf8_lossy(&generated).into_owned()])
        }
    }
}

fn run_sessions_list(
    context: &ApexdContext,
    style: OutputStyle,
    state: Option<SessionState>,
) -> Result<Vec<String>> {
    let manager = context.session_manager();
    let mut sessions = match state {
        Some(state) => manager.get_sessions_in_state(state)?,
        None => manager.get_sessions()?,
    };
    sessions.sort_by_key(|session| session.id());

    if sessions.is_empty() {
        return Ok(vec![render_status_line(style, "info", "no sessions")]);
    }
    Ok(sessions
        .iter()
        .map(|session| format_session_line(style, session))
        .collect())
}

fn run_sessions_delete_finalized(context: &ApexdContext, style: OutputStyle) -> Result<Vec<String>> {
    let deleted = context.session_manager().delete_finalized_sessions()?;
    if deleted.is_empty() {
        return Ok(vec![render_status_line(
            style,
            "info",
            "no finalized sessions",
        )]);
    }
    Ok(deleted
        .iter()
        .map(|id| render_status_line(style, "ok", &format!("deleted session {id}")))
        .collect())
}

fn run_sessions_migrate(
    context: &ApexdContext,
    style: OutputStyle,
    from: Option<&Path>,
) -> Result<Vec<String>> {
    let manager = context.session_manager();
    let Some(from) = from.or_else(|| context.legacy_sessions_dir()) else {
        return Ok(vec![render_status_line(
            style,
            "info",
            &format!(
                "sessions dir {} has no older root to migrate from",
                manager.sessions_base_dir().display()
            ),
        )]);
    };

    manager.migrate_from_old_sessions_dir(from)?;
    Ok(vec![render_status_line(
        style,
        "ok",
        &format!(
            "migrated sessions from {} to {}",
            from.display(),
            manager.sessions_base_dir().display()
        ),
    )])
}

fn run_hashtree_prepare(
    context: &ApexdContext,
    style: OutputStyle,
    bundle: &Path,
    target: Option<&Path>,
) -> Result<Vec<String>> {
    let apex = ApexFile::open(bundle)?;
    let package_name = apex.manifest().name.clone();
    // Compressed bundles have nothing to verify; preparation rejects them.
    let verity_data = if apex.is_compressed() {
        VerityData::default()
    } else {
        apex.verify_apex_verity(apex.bundled_public_key())?
    };
    let target = target
        .map(Path::to_path_buf)
        .unwrap_or_else(|| context.hashtree_manager().hashtree_path_for(&package_name));

    let spinner = Spinner::start(style, &format!("hashing {package_name}"));
    let result = prepare_hash_tree(&apex, &verity_data, &target);
    spinner.finish();
    let result = result?;

    Ok(vec![render_status_line(
        style,
        "ok",
        &format!(
            "{} hashtree {} for {} (root {})",
            result.as_str(),
            target.display(),
            package_name,
            verity_data.root_digest_hex()
        ),
    )])
}

pub(crate) fn write_completions(shell: Shell, writer: &mut dyn Write) -> Result<()> {
    let mut command = Cli::command();
    let mut generated = Vec::new();
    clap_complete::generate(shell, &mut command, "apexctl", &mut generated);
    writer
        .write_all(&generated)
        .context("failed writing generated completion script")
}
