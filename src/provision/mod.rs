//! Boot-time provisioning payload.
//!
//! The payload is an ordered list of typed [`ProvisionStep`]s rather than a
//! hand-written script. The stack builder never looks inside it; it is
//! rendered to a shell script only when a provider needs the instance's
//! user data.
//!
//! ```rust
//! use infrastack::provision::{rails_postgres_recipe, RepositoryUrl};
//!
//! let payload = rails_postgres_recipe(&RepositoryUrl::placeholder());
//! let script = payload.render();
//! assert!(script.starts_with("#!/bin/bash\n"));
//! ```

mod recipe;

pub use recipe::{rails_postgres_recipe, APP_DIR, APP_USER};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Repository cloned when no URL is configured.
pub const PLACEHOLDER_REPO_URL: &str = "https://github.com/your-org/your-app.git";

/// Source repository of the deployed application.
///
/// The only dynamic input of the boot payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepositoryUrl(String);

impl RepositoryUrl {
    /// Wrap a repository URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    /// The placeholder repository.
    pub fn placeholder() -> Self {
        Self::new(PLACEHOLDER_REPO_URL)
    }

    /// Whether this is still the placeholder.
    pub fn is_placeholder(&self) -> bool {
        self.0 == PLACEHOLDER_REPO_URL
    }

    /// The URL as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RepositoryUrl {
    fn default() -> Self {
        Self::placeholder()
    }
}

impl fmt::Display for RepositoryUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One typed provisioning step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ProvisionStep {
    /// Progress line written to the boot log
    Banner { message: String },
    /// Upgrade every installed package
    UpdatePackages,
    /// Install packages with the system package manager
    InstallPackages { packages: Vec<String> },
    /// Enable a service at boot and start it now
    EnableService { service: String },
    /// Restart a running service
    RestartService { service: String },
    /// Copy a file next to itself with a `.bak` suffix
    BackupFile { path: String },
    /// Replace every occurrence of a word in a file
    ReplaceInFile {
        path: String,
        from: String,
        to: String,
    },
    /// Run a command as another user through a login shell
    RunAs { user: String, command: Vec<String> },
    /// Install a Ruby gem
    GemInstall { gem: String },
    /// Append a line to a file, optionally handing the file to an owner
    AppendLine {
        path: String,
        line: String,
        owner: Option<String>,
    },
    /// Clone the application repository
    CloneRepository {
        url: RepositoryUrl,
        destination: String,
        owner: String,
    },
    /// Run an arbitrary command
    Command { argv: Vec<String> },
}

impl ProvisionStep {
    /// Shorthand for a banner step.
    pub fn banner(message: impl Into<String>) -> Self {
        ProvisionStep::Banner {
            message: message.into(),
        }
    }

    /// Shorthand for a package installation step.
    pub fn install<I, S>(packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ProvisionStep::InstallPackages {
            packages: packages.into_iter().map(Into::into).collect(),
        }
    }

    /// Render the step as shell lines.
    fn render_into(&self, out: &mut Vec<String>) {
        match self {
            ProvisionStep::Banner { message } => {
                out.push(format!("echo {}", quote(&format!("[INIT] {}", message))));
            }
            ProvisionStep::UpdatePackages => out.push("dnf update -y".to_string()),
            ProvisionStep::InstallPackages { packages } => {
                out.push(format!("dnf install -y {}", join(packages)));
            }
            ProvisionStep::EnableService { service } => {
                out.push(format!("systemctl enable {}", quote(service)));
                out.push(format!("systemctl start {}", quote(service)));
            }
            ProvisionStep::RestartService { service } => {
                out.push(format!("systemctl restart {}", quote(service)));
            }
            ProvisionStep::BackupFile { path } => {
                out.push(format!("cp {} {}", quote(path), quote(&format!("{}.bak", path))));
            }
            ProvisionStep::ReplaceInFile { path, from, to } => {
                out.push(format!(
                    "sed -i {} {}",
                    quote(&format!("s/{}/{}/g", from, to)),
                    quote(path)
                ));
            }
            ProvisionStep::RunAs { user, command } => {
                out.push(format!("su - {} -c {}", quote(user), quote(&join(command))));
            }
            ProvisionStep::GemInstall { gem } => out.push(format!("gem install {}", quote(gem))),
            ProvisionStep::AppendLine { path, line, owner } => {
                out.push(format!("echo {} >> {}", quote(line), quote(path)));
                if let Some(owner) = owner {
                    out.push(format!("chown {}:{} {}", owner, owner, quote(path)));
                }
            }
            ProvisionStep::CloneRepository {
                url,
                destination,
                owner,
            } => {
                out.push(format!(
                    "git clone {} {}",
                    quote(url.as_str()),
                    quote(destination)
                ));
                out.push(format!("chown -R {}:{} {}", owner, owner, quote(destination)));
            }
            ProvisionStep::Command { argv } => out.push(join(argv)),
        }
    }
}

fn quote(word: &str) -> String {
    shell_words::quote(word).into_owned()
}

fn join(words: &[String]) -> String {
    shell_words::join(words)
}

/// Ordered list of provisioning steps carried by a compute instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootPayload {
    steps: Vec<ProvisionStep>,
}

impl BootPayload {
    /// Empty payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step.
    pub fn step(mut self, step: ProvisionStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Steps in execution order.
    pub fn steps(&self) -> &[ProvisionStep] {
        &self.steps
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the payload has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The repository the payload clones, if any.
    pub fn repository(&self) -> Option<&RepositoryUrl> {
        self.steps.iter().find_map(|step| match step {
            ProvisionStep::CloneRepository { url, .. } => Some(url),
            _ => None,
        })
    }

    /// Render the payload as a bash script.
    pub fn render(&self) -> String {
        // No errexit: a failed step does not stop the ones after it.
        let mut lines = vec!["#!/bin/bash".to_string()];
        for step in &self.steps {
            lines.push(String::new());
            step.render_into(&mut lines);
        }
        let mut script = lines.join("\n");
        script.push('\n');
        script
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_render_empty_payload() {
        assert_eq!(BootPayload::new().render(), "#!/bin/bash\n");
    }

    #[test]
    fn test_render_steps_in_order() {
        let payload = BootPayload::new()
            .step(ProvisionStep::banner("Installing tools"))
            .step(ProvisionStep::install(["git", "wget"]))
            .step(ProvisionStep::EnableService {
                service: "postgresql".to_string(),
            });

        assert_eq!(
            payload.render(),
            "#!/bin/bash\n\
             \necho '[INIT] Installing tools'\n\
             \ndnf install -y git wget\n\
             \nsystemctl enable postgresql\nsystemctl start postgresql\n"
        );
    }

    #[test]
    fn test_render_quotes_untrusted_words() {
        let payload = BootPayload::new().step(ProvisionStep::CloneRepository {
            url: RepositoryUrl::new("https://example.com/app.git; rm -rf /"),
            destination: "/home/ec2-user/app".to_string(),
            owner: "ec2-user".to_string(),
        });

        let script = payload.render();
        assert!(script.contains("git clone 'https://example.com/app.git; rm -rf /' /home/ec2-user/app"));
    }

    #[test]
    fn test_run_as_quotes_whole_command() {
        let payload = BootPayload::new().step(ProvisionStep::RunAs {
            user: "postgres".to_string(),
            command: vec!["createuser".to_string(), "-s".to_string(), "ec2-user".to_string()],
        });
        assert!(payload
            .render()
            .contains("su - postgres -c 'createuser -s ec2-user'"));
    }

    #[test]
    fn test_repository_lookup() {
        let payload = BootPayload::new();
        assert!(payload.repository().is_none());

        let payload = payload.step(ProvisionStep::CloneRepository {
            url: RepositoryUrl::placeholder(),
            destination: "/srv/app".to_string(),
            owner: "app".to_string(),
        });
        assert!(payload.repository().unwrap().is_placeholder());
    }
}
