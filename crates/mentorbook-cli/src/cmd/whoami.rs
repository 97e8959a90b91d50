//! `mb whoami`: the session identity and what its active role may do.

use anyhow::Result;
use mentorbook_core::Role;
use mentorbook_core::permissions::Capabilities;
use serde::Serialize;
use std::io::Write;

use crate::context::Context;
use crate::output::{pretty_kv, pretty_section, render_mode};

#[derive(Debug, Serialize)]
struct WhoAmI {
    subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    held_roles: Vec<Role>,
    original_role: Role,
    active_role: Role,
    capabilities: Capabilities,
}

fn joined(roles: &[Role]) -> String {
    roles.iter().copied().map(Role::as_str).collect::<Vec<_>>().join(", ")
}

/// # Errors
///
/// Returns an error when no session can be opened.
pub fn run_whoami(ctx: &Context) -> Result<()> {
    let session = ctx.open_session()?;
    let actor = session.actor();
    let who = WhoAmI {
        subject: actor.id().to_string(),
        name: session.display_name().map(str::to_string),
        held_roles: actor.held_roles().to_vec(),
        original_role: actor.original_role(),
        active_role: actor.active_role(),
        capabilities: actor.capabilities(),
    };

    render_mode(
        ctx.output,
        &who,
        |who, w| writeln!(w, "{} ({})", who.subject, who.active_role),
        |who, w| {
            pretty_section(w, &who.subject)?;
            if let Some(name) = &who.name {
                pretty_kv(w, "Name", name)?;
            }
            pretty_kv(w, "Roles", joined(&who.held_roles))?;
            pretty_kv(w, "Signed in", who.original_role.as_str())?;
            pretty_kv(w, "Active", who.active_role.as_str())?;
            pretty_kv(
                w,
                "Requests",
                if who.capabilities.can_request_mentor {
                    "may request events"
                } else {
                    "may not request events"
                },
            )?;
            pretty_kv(
                w,
                "Processing",
                if who.capabilities.can_process_mentor_requests {
                    "may accept and decline"
                } else {
                    "-"
                },
            )
        },
    )
}
