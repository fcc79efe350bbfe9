use crate::cli::{LoginArgs, RegisterArgs};
use crate::context::AppContext;
use crate::error::Result;
use crate::output::{self, print_field};
use crate::types::User;
use crate::validation::{LoginForm, RegisterForm};

use super::prompt;

fn password_or_prompt(password: Option<String>) -> Result<String> {
    match password {
        Some(password) => Ok(password),
        None => prompt("Password: "),
    }
}

fn print_user(user: &User) {
    output::print_item(user, |u| {
        print_field("Name", Some(&u.name));
        print_field("Email", Some(&u.email));
        print_field("Role", Some(u.role.as_str()));
    });
}

pub async fn login(ctx: &mut AppContext, args: LoginArgs) -> Result<()> {
    let form = LoginForm {
        email: args.email,
        password: password_or_prompt(args.password)?,
    };
    let user = ctx.login(&form).await?;
    output::print_message(&format!("Signed in as {} ({})", user.name, user.role));
    Ok(())
}

pub async fn register(ctx: &mut AppContext, args: RegisterArgs) -> Result<()> {
    let form = RegisterForm {
        name: args.name,
        email: args.email,
        password: password_or_prompt(args.password)?,
        role: args.role,
    };
    let user = ctx.register(&form).await?;
    output::print_message(&format!("Account created, signed in as {}", user.name));
    Ok(())
}

pub async fn logout(ctx: &mut AppContext) -> Result<()> {
    ctx.logout().await?;
    output::print_message("Signed out");
    Ok(())
}

pub fn whoami(ctx: &AppContext) -> Result<()> {
    if let Some(user) = ctx.user() {
        print_user(user);
    }
    Ok(())
}

pub fn theme(ctx: &mut AppContext, show: bool) -> Result<()> {
    let theme = if show {
        ctx.session().theme()
    } else {
        ctx.toggle_theme()?
    };
    output::print_message(&format!("Theme: {theme}"));
    Ok(())
}
