//! First-boot provisioning scripts.

use crate::template::Expr;

/// Interpreter line for Linux user data.
pub const LINUX_SHEBANG: &str = "#!/bin/bash";

/// An ordered list of shell commands run once when the instance first boots.
///
/// Commands run in the order they were added. There is no retry and no
/// branching: the first failing command stops the rest of the script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningScript {
    shebang: String,
    commands: Vec<Expr>,
}

impl ProvisioningScript {
    /// Empty bash script.
    #[must_use]
    pub fn for_linux() -> Self {
        Self {
            shebang: LINUX_SHEBANG.to_string(),
            commands: Vec::new(),
        }
    }

    /// Append commands.
    pub fn add_commands<I, C>(&mut self, commands: I)
    where
        I: IntoIterator<Item = C>,
        C: Into<Expr>,
    {
        self.commands.extend(commands.into_iter().map(Into::into));
    }

    /// Commands in execution order.
    #[must_use]
    pub fn commands(&self) -> &[Expr] {
        &self.commands
    }

    /// Number of commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the script has no commands.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// The whole script as one value, lines joined with `\n`.
    #[must_use]
    pub fn render(&self) -> Expr {
        let lines =
            std::iter::once(Expr::literal(&self.shebang)).chain(self.commands.iter().cloned());
        Expr::join("\n", lines)
    }

    /// Base64 `UserData` value for an instance.
    #[must_use]
    pub fn to_user_data(&self) -> Expr {
        Expr::base64(self.render())
    }
}
