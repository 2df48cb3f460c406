//! Default plans written by `provision init`.
//!
//! Linux is the production layout (systemd + pm2 + nginx in front of the API,
//! ArangoDB from the distribution package). Windows is the development
//! layout: a virtualenv and the API started directly, no proxy.

use crate::action::{Action, ActionKind, Operation, ServiceControl};
use crate::config::{Config, ProjectConfig};
use crate::environment::{EnvironmentConfig, Platform};
use crate::health::HealthSettings;
use crate::predicate::Predicate;
use crate::probe::{Matcher, Probe};
use crate::service::ServiceDescriptor;
use serde_json::json;

pub fn default_config(project: &str, platform: Platform) -> Config {
    let (environment, services, actions) = match platform {
        Platform::Windows => windows_stack(),
        Platform::Linux | Platform::Macos => linux_stack(platform),
    };
    Config {
        version: 1,
        project: ProjectConfig {
            name: project.to_string(),
            description: Some(format!("{} stack on {platform}", project)),
        },
        environment,
        health: HealthSettings::default(),
        services,
        actions,
    }
}

fn shell(id: &str, description: &str, kind: ActionKind, command: &str) -> Action {
    Action::new(id, description, kind, Operation::shell(command))
}

fn start(id: &str, service: &str) -> Action {
    Action::new(
        id,
        format!("start {service}"),
        ActionKind::ServiceControl,
        Operation::service(service, ServiceControl::Start),
    )
    .when(Predicate::service_running(service))
}

fn api_health_probe() -> (Probe, Matcher) {
    (
        Probe::http("http://localhost:${APP_PORT}/health"),
        Matcher::json_field("services.arangodb", json!("connected")),
    )
}

// ---------------------------------------------------------------------------
// Linux (production)
// ---------------------------------------------------------------------------

const PM2_ECOSYSTEM: &str = r#"module.exports = {
  apps: [{
    name: "${PM2_APP}",
    cwd: "${APP_DIR}",
    script: "src/api_server_simple.py",
    interpreter: "${APP_DIR}/venv/bin/python",
    env: { FLASK_PORT: "${APP_PORT}", ARANGODB_PORT: "${ARANGO_PORT}" },
    autorestart: true,
    max_restarts: 10
  }]
};
"#;

const NGINX_SITE: &str = r#"server {
    listen 80;
    server_name ${DOMAIN};

    location / {
        proxy_pass http://127.0.0.1:${APP_PORT};
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_read_timeout 300;
    }
}
"#;

fn linux_stack(platform: Platform) -> (EnvironmentConfig, Vec<ServiceDescriptor>, Vec<Action>) {
    let environment = EnvironmentConfig::new("production", platform)
        .with_var("APP_DIR", "/opt/pathrag/pathrag")
        .with_var("APP_PORT", "8000")
        .with_var("ARANGO_PORT", "8529")
        .with_var("DOMAIN", "localhost")
        .with_var("PM2_APP", "pathrag-api")
        .with_var("PM2_HOME", "/root/.pm2")
        .with_var("REPO_URL", "https://github.com/your-org/pathrag.git");

    let (api_probe, api_expect) = api_health_probe();
    let services = vec![
        ServiceDescriptor {
            name: "arangodb".to_string(),
            description: "graph database (systemd unit arangodb3)".to_string(),
            probe: Probe::http("http://localhost:${ARANGO_PORT}/_api/version"),
            expect: Matcher {
                json_pointer: Some("/version".to_string()),
                ..Matcher::default()
            },
            start: Operation::shell("systemctl start arangodb3"),
            stop: Operation::shell("systemctl stop arangodb3"),
            status: Operation::shell("systemctl is-active --quiet arangodb3"),
            health: Some(HealthSettings::new(90, 3)),
        },
        ServiceDescriptor {
            name: "pathrag-api".to_string(),
            description: "RAG API under pm2".to_string(),
            probe: api_probe,
            expect: api_expect,
            start: Operation::shell("PM2_HOME=${PM2_HOME} pm2 start ${APP_DIR}/ecosystem.config.js"),
            stop: Operation::shell("PM2_HOME=${PM2_HOME} pm2 stop ${PM2_APP}"),
            status: Operation::shell(
                "PM2_HOME=${PM2_HOME} pm2 describe ${PM2_APP} | grep -q online",
            ),
            health: None,
        },
        ServiceDescriptor {
            name: "nginx".to_string(),
            description: "reverse proxy".to_string(),
            probe: Probe::http("http://${DOMAIN}/health"),
            expect: Matcher::default(),
            start: Operation::shell("systemctl start nginx"),
            stop: Operation::shell("systemctl stop nginx"),
            status: Operation::shell("systemctl is-active --quiet nginx"),
            health: Some(HealthSettings::new(30, 2)),
        },
    ];

    let actions = vec![
        shell(
            "apt-packages",
            "system packages",
            ActionKind::Install,
            "apt-get update && apt-get install -y python3-venv nginx git curl",
        )
        .when(Predicate::All {
            of: vec![
                Predicate::command_available("nginx"),
                Predicate::command_available("git"),
                Predicate::command_succeeds("dpkg -s python3-venv"),
            ],
        })
        .with_retries(1),
        shell(
            "install-nodejs",
            "Node.js for the process supervisor",
            ActionKind::Install,
            "curl -fsSL https://deb.nodesource.com/setup_20.x | bash - && apt-get install -y nodejs",
        )
        .when(Predicate::command_available("node")),
        shell(
            "install-pm2",
            "pm2 process supervisor",
            ActionKind::Install,
            "npm install -g pm2",
        )
        .when(Predicate::command_available("pm2"))
        .recoverable(),
        shell(
            "install-arangodb",
            "graph database package",
            ActionKind::Install,
            "apt-get install -y arangodb3",
        )
        .when(Predicate::command_available("arangod")),
        shell(
            "clone-app",
            "application checkout",
            ActionKind::Install,
            "git clone ${REPO_URL} ${APP_DIR}",
        )
        .when(Predicate::file_exists("${APP_DIR}/.git")),
        shell(
            "create-venv",
            "python virtualenv",
            ActionKind::Install,
            "python3 -m venv ${APP_DIR}/venv",
        )
        .when(Predicate::file_exists("${APP_DIR}/venv/bin/python")),
        shell(
            "pip-install",
            "python requirements",
            ActionKind::Install,
            "${APP_DIR}/venv/bin/pip install -r ${APP_DIR}/requirements.txt",
        )
        .when(Predicate::command_succeeds(
            "${APP_DIR}/venv/bin/python -c 'import flask, arango'",
        ))
        .with_retries(2),
        Action::new(
            "pm2-ecosystem",
            "supervisor config for the API",
            ActionKind::Configure,
            Operation::write_file("${APP_DIR}/ecosystem.config.js", PM2_ECOSYSTEM),
        )
        .when(Predicate::FileContains {
            path: "${APP_DIR}/ecosystem.config.js".to_string(),
            text: "${PM2_APP}".to_string(),
        }),
        Action::new(
            "nginx-site",
            "reverse proxy site",
            ActionKind::Configure,
            Operation::write_file("/etc/nginx/sites-available/pathrag", NGINX_SITE),
        )
        .when(Predicate::file_exists("/etc/nginx/sites-available/pathrag")),
        shell(
            "enable-site",
            "enable the proxy site",
            ActionKind::Configure,
            "ln -sf /etc/nginx/sites-available/pathrag /etc/nginx/sites-enabled/pathrag && nginx -t",
        )
        .when(Predicate::file_exists("/etc/nginx/sites-enabled/pathrag")),
        start("start-arangodb", "arangodb"),
        start("start-api", "pathrag-api"),
        start("start-nginx", "nginx"),
        shell(
            "pm2-save",
            "persist the pm2 process list across reboots",
            ActionKind::Configure,
            "PM2_HOME=${PM2_HOME} pm2 save",
        )
        .recoverable(),
    ];

    (environment, services, actions)
}

// ---------------------------------------------------------------------------
// Windows (development)
// ---------------------------------------------------------------------------

const DOTENV: &str = r#"ARANGODB_HOST=localhost
ARANGODB_PORT=${ARANGO_PORT}
ARANGODB_DATABASE=pathrag
PATHRAG_WORKING_DIR=./pathrag_data
FLASK_HOST=127.0.0.1
FLASK_PORT=${APP_PORT}
LOG_LEVEL=INFO
"#;

fn windows_stack() -> (EnvironmentConfig, Vec<ServiceDescriptor>, Vec<Action>) {
    let environment = EnvironmentConfig::new("development", Platform::Windows)
        .with_var("APP_DIR", r"C:\pathrag")
        .with_var("APP_PORT", "5000")
        .with_var("ARANGO_PORT", "8529");

    let (api_probe, api_expect) = api_health_probe();
    let listening = r"netstat -ano | findstr :${APP_PORT} | findstr LISTENING";
    let services = vec![ServiceDescriptor {
        name: "pathrag-api".to_string(),
        description: "RAG API started from the virtualenv".to_string(),
        probe: api_probe,
        expect: api_expect,
        start: Operation::shell(
            r#"start "pathrag-api" /B /D ${APP_DIR} ${APP_DIR}\venv\Scripts\python.exe src\api_server.py"#,
        ),
        stop: Operation::shell(format!(
            r#"for /f "tokens=5" %p in ('{}') do taskkill /F /PID %p"#,
            listening.replace('|', "^|")
        )),
        status: Operation::shell(listening),
        health: None,
    }];

    let actions = vec![
        shell(
            "check-choco",
            "Chocolatey package manager (optional)",
            ActionKind::Install,
            "choco --version",
        )
        .when(Predicate::command_available("choco"))
        .recoverable(),
        shell(
            "install-python",
            "Python 3",
            ActionKind::Install,
            "choco install -y python3",
        )
        .when(Predicate::command_available("python")),
        shell(
            "create-venv",
            "python virtualenv",
            ActionKind::Install,
            r"python -m venv ${APP_DIR}\venv",
        )
        .when(Predicate::file_exists(r"${APP_DIR}\venv\Scripts\python.exe")),
        shell(
            "pip-install",
            "python requirements",
            ActionKind::Install,
            r"${APP_DIR}\venv\Scripts\pip.exe install -r ${APP_DIR}\requirements.txt",
        )
        .when(Predicate::command_succeeds(
            r#"${APP_DIR}\venv\Scripts\python.exe -c "import flask, arango, pathrag""#,
        ))
        .with_retries(2),
        Action::new(
            "write-env",
            "application settings",
            ActionKind::Configure,
            Operation::write_file(r"${APP_DIR}\.env", DOTENV),
        )
        .when(Predicate::file_exists(r"${APP_DIR}\.env")),
        start("start-api", "pathrag-api"),
    ];

    (environment, services, actions)
}
