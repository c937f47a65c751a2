//! Rails on PostgreSQL recipe for Amazon Linux 2023.

use super::{BootPayload, ProvisionStep, RepositoryUrl};

/// Login user of the instance; owns the application checkout.
pub const APP_USER: &str = "ec2-user";

/// Checkout directory of the application.
pub const APP_DIR: &str = "/home/ec2-user/app";

const PG_HBA: &str = "/var/lib/pgsql/data/pg_hba.conf";

/// Ruby 3.2, PostgreSQL 16 with trusted local auth, Rails, then the app.
pub fn rails_postgres_recipe(repo: &RepositoryUrl) -> BootPayload {
    use ProvisionStep as S;

    BootPayload::new()
        .step(S::banner("Updating system packages"))
        .step(S::UpdatePackages)
        .step(S::banner("Installing basic tools"))
        .step(S::install(["git", "wget", "dnf-utils"]))
        .step(S::banner("Installing Ruby"))
        .step(S::install(["ruby3.2"]))
        .step(S::banner("Installing PostgreSQL 16"))
        .step(S::install(["postgresql16", "postgresql16-server"]))
        .step(S::banner("Initializing PostgreSQL database"))
        .step(S::Command {
            argv: vec!["postgresql-setup".to_string(), "initdb".to_string()],
        })
        .step(S::banner("Starting and enabling PostgreSQL service"))
        .step(S::EnableService {
            service: "postgresql".to_string(),
        })
        .step(S::banner("Configuring PostgreSQL local connections"))
        .step(S::BackupFile {
            path: PG_HBA.to_string(),
        })
        .step(trust(PG_HBA, "ident"))
        .step(trust(PG_HBA, "peer"))
        .step(S::RestartService {
            service: "postgresql".to_string(),
        })
        .step(S::banner("Creating PostgreSQL user"))
        .step(S::RunAs {
            user: "postgres".to_string(),
            command: vec!["createuser".to_string(), "-s".to_string(), APP_USER.to_string()],
        })
        .step(S::banner("Installing Rails dependencies"))
        .step(S::install([
            "ruby3.2-devel",
            "make",
            "gcc",
            "gcc-c++",
            "redhat-rpm-config",
            "libyaml-devel",
        ]))
        .step(S::banner("Installing Rails"))
        .step(S::GemInstall {
            gem: "rails".to_string(),
        })
        .step(S::banner("Setting up environment"))
        .step(S::AppendLine {
            path: format!("/home/{}/.bashrc", APP_USER),
            line: r#"export PATH="$PATH:$HOME/.local/bin:/usr/local/bin""#.to_string(),
            owner: Some(APP_USER.to_string()),
        })
        .step(S::banner("Cloning application"))
        .step(S::CloneRepository {
            url: repo.clone(),
            destination: APP_DIR.to_string(),
            owner: APP_USER.to_string(),
        })
        .step(S::banner("Installation Complete"))
}

fn trust(path: &str, method: &str) -> ProvisionStep {
    ProvisionStep::ReplaceInFile {
        path: path.to_string(),
        from: method.to_string(),
        to: "trust".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipe_interpolates_repository_once() {
        let repo = RepositoryUrl::new("https://github.com/acme/btc-tracker.git");
        let payload = rails_postgres_recipe(&repo);

        assert_eq!(payload.repository(), Some(&repo));
        let script = payload.render();
        assert_eq!(script.matches("btc-tracker.git").count(), 1);
    }

    #[test]
    fn test_recipe_configures_postgres_before_creating_role() {
        let script = rails_postgres_recipe(&RepositoryUrl::placeholder()).render();

        let initdb = script.find("postgresql-setup initdb").unwrap();
        let trust = script.find("sed -i s/peer/trust/g").unwrap();
        let role = script.find("createuser -s ec2-user").unwrap();
        assert!(initdb < trust && trust < role);
    }

    #[test]
    fn test_recipe_path_line_is_single_quoted() {
        let script = rails_postgres_recipe(&RepositoryUrl::placeholder()).render();
        assert!(script.contains(
            r#"echo 'export PATH="$PATH:$HOME/.local/bin:/usr/local/bin"' >> /home/ec2-user/.bashrc"#
        ));
        assert!(script.contains("chown ec2-user:ec2-user /home/ec2-user/.bashrc"));
    }

    #[test]
    fn test_recipe_ends_with_completion_banner() {
        let payload = rails_postgres_recipe(&RepositoryUrl::placeholder());
        assert_eq!(
            payload.steps().last(),
            Some(&ProvisionStep::banner("Installation Complete"))
        );
    }
}
