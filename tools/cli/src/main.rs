//! LoanTrack CLI - Command line driver for the offline queue and loan book.
//!
//! Captures documents and forms into the offline queue, drains it to the
//! configured upload endpoint, and manages loan applications and
//! notifications stored alongside it.

mod config;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use loantrack_common::{ApplicationId, EntryId, MediaKind};
use loantrack_loans::{
    ApplicationDocument, ApplicationUpdate, LoanBook, LoanBookStore, LoanCatalog, NewApplication,
    ReviewDecision,
};
use loantrack_notify::{LogNotifier, NotificationCenter, NotificationRelay};
use loantrack_storage::{create_default_registry, RecordStore};
use loantrack_sync::{
    ConnectivityMonitor, EntryKind, HttpProbe, HttpTransport, QueuePersistence, QueuedDocument,
    QueuedForm, SyncEngine, SyncOutcome, SyncScheduler, SyncStore,
};

use crate::config::{default_data_dir, AppConfig, CONFIG_FILE};

/// Store key of the persisted notification center.
const NOTIFICATIONS_KEY: &str = "notifications";

#[derive(Parser)]
#[command(name = "loantrack")]
#[command(about = "LoanTrack - Offline-first loan application sync")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Data directory (default: platform data dir).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Config file (default: loantrack.json in the data directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show pending uploads and connectivity.
    Status,

    /// List queued documents and forms.
    List,

    /// Queue a captured file for upload.
    Capture {
        /// File to upload.
        file: PathBuf,

        /// Loan application the document belongs to.
        #[arg(short, long)]
        application: String,

        /// Media kind: image, video or document.
        #[arg(short, long, default_value = "image")]
        kind: MediaKind,
    },

    /// Queue a form submission for upload.
    SubmitForm {
        /// Form JSON, or @path to read it from a file.
        #[arg(short, long)]
        data: String,

        /// Loan application the form belongs to.
        #[arg(short, long)]
        application: Option<String>,
    },

    /// Remove a queued entry regardless of its status.
    Remove {
        /// Entry id.
        id: String,

        /// Target the form with this id, even if a document shares it.
        #[arg(long)]
        form: bool,
    },

    /// Make a failed or dead-lettered entry eligible again.
    Requeue {
        /// Entry id.
        id: String,

        /// Target the form with this id, even if a document shares it.
        #[arg(long)]
        form: bool,
    },

    /// Drop uploaded entries from the queue.
    Prune,

    /// Run one sync pass now.
    Sync {
        /// Sync even when the reachability check fails.
        #[arg(short, long)]
        force: bool,
    },

    /// Check connectivity periodically and sync until interrupted.
    Watch,

    /// Clear the offline queue (logout).
    Reset,

    /// Loan applications.
    Loan {
        #[command(subcommand)]
        command: LoanCommands,
    },

    /// In-app notifications.
    Notifications {
        #[command(subcommand)]
        command: NotificationCommands,
    },
}

#[derive(Subcommand)]
enum LoanCommands {
    /// List loan products.
    Types,

    /// Submit a loan application.
    Apply {
        /// Loan type id, e.g. home or vehicle.
        #[arg(short = 't', long)]
        loan_type: String,

        /// Requested amount in rupees.
        #[arg(short, long)]
        amount: u64,

        /// What the loan is for.
        #[arg(short, long)]
        purpose: String,

        #[arg(short, long)]
        notes: Option<String>,
    },

    /// List applications.
    List,

    /// Show one application (default: the current one).
    Show { id: Option<String> },

    /// Select the current application.
    Select { id: String },

    /// Change an undecided application.
    Update {
        id: String,

        #[arg(short, long)]
        amount: Option<u64>,

        #[arg(short, long)]
        purpose: Option<String>,

        #[arg(short, long)]
        notes: Option<String>,
    },

    /// Record a review decision: approved, rejected or clarification.
    Review {
        id: String,

        #[arg(short, long)]
        decision: ReviewDecision,

        #[arg(short, long)]
        reviewer: String,

        #[arg(short, long)]
        notes: Option<String>,
    },

    /// Show counts and amounts over all applications.
    Report,
}

#[derive(Subcommand)]
enum NotificationCommands {
    /// List notifications, newest first.
    List,

    /// Mark one notification, or all, as read.
    Read {
        id: Option<String>,

        #[arg(long)]
        all: bool,
    },

    /// Delete a notification.
    Remove { id: String },

    /// Delete all notifications.
    Clear,

    /// Turn notifications on.
    Enable,

    /// Turn notifications off.
    Disable,

    /// Remind the applicant to upload documents.
    RemindDocuments { application: String },

    /// Remind the applicant of an upcoming EMI payment.
    RemindPayment {
        #[arg(short, long)]
        amount: u64,

        /// Due date (YYYY-MM-DD).
        #[arg(short, long)]
        due: NaiveDate,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let app = App::open(cli.data_dir, cli.config).await?;

    match cli.command {
        Commands::Status => cmd_status(&app).await,
        Commands::List => cmd_list(&app).await,
        Commands::Capture {
            file,
            application,
            kind,
        } => cmd_capture(&app, &file, &application, kind).await,
        Commands::SubmitForm { data, application } => {
            cmd_submit_form(&app, &data, application.as_deref()).await
        }
        Commands::Remove { id, form } => cmd_remove(&app, &id, form).await,
        Commands::Requeue { id, form } => cmd_requeue(&app, &id, form).await,
        Commands::Prune => cmd_prune(&app).await,
        Commands::Sync { force } => cmd_sync(&app, force).await,
        Commands::Watch => cmd_watch(&app).await,
        Commands::Reset => cmd_reset(&app).await,
        Commands::Loan { command } => cmd_loan(&app, command).await,
        Commands::Notifications { command } => cmd_notifications(&app, command).await,
    }
}

/// Services opened from the data directory.
struct App {
    config: AppConfig,
    records: Arc<dyn RecordStore>,
    queue: SyncStore,
}

impl App {
    async fn open(data_dir: Option<PathBuf>, config_path: Option<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create {}", data_dir.display()))?;

        let config_path = config_path.unwrap_or_else(|| data_dir.join(CONFIG_FILE));
        let config = AppConfig::load_or_default(&config_path)?;

        let registry = create_default_registry();
        if !registry.has_store(&config.store.kind) {
            anyhow::bail!(
                "Unknown store kind '{}' in {}, expected one of: {}",
                config.store.kind,
                config_path.display(),
                registry.stores().join(", ")
            );
        }
        let records = registry
            .resolve(&config.store.kind, config.store_settings(&data_dir))
            .with_context(|| format!("Failed to open {} store", config.store.kind))?;
        info!("Using {} store in {}", records.name(), data_dir.display());

        let persistence = QueuePersistence::with_key(records.clone(), config.sync.queue_key.clone())
            .context("Invalid queue key")?;
        let queue = SyncStore::restore(persistence)
            .await
            .context("Failed to restore offline queue")?;

        Ok(Self {
            config,
            records,
            queue,
        })
    }

    fn monitor(&self) -> Result<ConnectivityMonitor> {
        let probe = HttpProbe::new(&self.config.sync.probe_url, self.config.sync.probe_timeout)
            .context("Failed to create connectivity probe")?;
        Ok(ConnectivityMonitor::new(Arc::new(probe), self.queue.clone()))
    }

    fn engine(&self) -> Result<SyncEngine> {
        let endpoint = self
            .config
            .upload_endpoint
            .clone()
            .with_context(|| format!("No upload_endpoint configured in {}", CONFIG_FILE))?;
        let transport = HttpTransport::with_timeout(endpoint, self.config.sync.upload_timeout)
            .context("Failed to create upload transport")?;
        Ok(SyncEngine::new(
            self.queue.clone(),
            Arc::new(transport),
            &self.config.sync,
        ))
    }

    fn loan_store(&self) -> LoanBookStore {
        LoanBookStore::new(self.records.clone())
    }

    async fn loan_book(&self) -> Result<LoanBook> {
        self.loan_store()
            .load(LoanCatalog::default())
            .await
            .context("Failed to load loan book")
    }

    async fn save_loan_book(&self, book: &LoanBook) -> Result<()> {
        self.loan_store()
            .save(book)
            .await
            .context("Failed to save loan book")
    }

    async fn relay(&self) -> Result<NotificationRelay> {
        let center = match self.records.get(NOTIFICATIONS_KEY).await? {
            Some(bytes) => serde_json::from_slice(&bytes).context("Corrupt notification store")?,
            None => NotificationCenter::new(),
        };
        Ok(NotificationRelay::new(
            Arc::new(LogNotifier),
            Arc::new(RwLock::new(center)),
        ))
    }

    async fn save_notifications(&self, relay: &NotificationRelay) -> Result<()> {
        let center = relay.center();
        let bytes = serde_json::to_vec(&*center.read().await)?;
        self.records
            .set(NOTIFICATIONS_KEY, bytes)
            .await
            .context("Failed to save notifications")
    }
}

fn entry_id(id: &str) -> Result<EntryId> {
    EntryId::new(id).context("Invalid entry id")
}

fn application_id(id: &str) -> Result<ApplicationId> {
    ApplicationId::new(id).context("Invalid application id")
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

fn status_label(status: &loantrack_sync::UploadStatus) -> String {
    if status.is_uploaded() {
        "uploaded".to_string()
    } else if status.is_dead_lettered() {
        format!("dead-lettered after {} attempts", status.attempts())
    } else if let Some(error) = status.last_error() {
        match status.next_attempt_at() {
            Some(at) => format!("failed ({}), retry after {}", error, at.format("%H:%M:%S")),
            None => format!("failed ({})", error),
        }
    } else {
        "pending".to_string()
    }
}

/// Show queue summary.
async fn cmd_status(app: &App) -> Result<()> {
    let summary = app.queue.summary().await;

    println!("Offline queue:");
    println!("  Pending uploads: {}", summary.pending_uploads);
    println!("  Documents: {}", summary.documents);
    println!("  Forms: {}", summary.forms);
    if summary.dead_lettered > 0 {
        println!("  Dead-lettered: {}", summary.dead_lettered);
    }
    match summary.last_sync_at {
        Some(at) => println!("  Last sync: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("  Last sync: never"),
    }
    match &app.config.upload_endpoint {
        Some(endpoint) => println!("  Upload endpoint: {}", endpoint),
        None => println!("  Upload endpoint: not configured"),
    }

    let keys = app.records.keys().await.context("Failed to list stored records")?;
    println!("Stored records ({}):", app.records.name());
    if keys.is_empty() {
        println!("  (none)");
    }
    for key in keys {
        println!("  {}", key);
    }

    Ok(())
}

/// List queued entries.
async fn cmd_list(app: &App) -> Result<()> {
    let state = app.queue.read().await;
    let queue = state.queue();

    if queue.documents().is_empty() && queue.forms().is_empty() {
        println!("(queue is empty)");
        return Ok(());
    }

    if !queue.documents().is_empty() {
        println!("Documents:");
        for doc in queue.documents() {
            println!(
                "  {} {} [{}] {} for {} - {}",
                doc.id,
                doc.name,
                doc.kind,
                format_bytes(doc.size),
                doc.application_id,
                status_label(doc.status())
            );
        }
    }

    if !queue.forms().is_empty() {
        println!("Forms:");
        for form in queue.forms() {
            let application = form
                .application_id
                .as_ref()
                .map(|a| a.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {} for {} queued {} - {}",
                form.id,
                application,
                form.created_at.format("%Y-%m-%d %H:%M"),
                status_label(form.status())
            );
        }
    }

    Ok(())
}

/// Queue a captured file.
async fn cmd_capture(app: &App, file: &Path, application: &str, kind: MediaKind) -> Result<()> {
    let path = file
        .canonicalize()
        .with_context(|| format!("File not found: {}", file.display()))?;
    let metadata = std::fs::metadata(&path).context("Failed to read file metadata")?;
    if !metadata.is_file() {
        anyhow::bail!("Not a file: {}", path.display());
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".to_string());
    let application_id = application_id(application)?;
    let uri = path.to_string_lossy().to_string();

    let document = QueuedDocument::new(
        kind,
        uri.clone(),
        name.clone(),
        metadata.len(),
        application_id.clone(),
    );
    let id = app.queue.enqueue_document(document).await?;

    let mut book = app.loan_book().await?;
    if book.get(&application_id).is_some() {
        book.add_document(
            &application_id,
            ApplicationDocument {
                id: id.clone(),
                kind,
                uri,
                name: name.clone(),
                size: metadata.len(),
                uploaded_at: chrono::Utc::now(),
                is_verified: false,
            },
        )?;
        app.save_loan_book(&book).await?;
    }

    println!("Queued {} as {}", name, id);
    Ok(())
}

/// Queue a form submission.
async fn cmd_submit_form(app: &App, data: &str, application: Option<&str>) -> Result<()> {
    let raw = match data.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read form data from {}", path))?,
        None => data.to_string(),
    };
    let form_data: serde_json::Value =
        serde_json::from_str(&raw).context("Form data is not valid JSON")?;
    let application_id = application.map(application_id).transpose()?;

    let id = app
        .queue
        .enqueue_form(QueuedForm::new(form_data, application_id))
        .await?;

    println!("Queued form {}", id);
    Ok(())
}

/// Which collection `id` refers to. Documents win unless `form` is set.
async fn queued_kind(app: &App, id: &EntryId, form: bool) -> Option<EntryKind> {
    let state = app.queue.read().await;
    if form {
        state.queue().form(id).map(|_| EntryKind::Form)
    } else {
        state.queue().kind_of(id)
    }
}

async fn cmd_remove(app: &App, id: &str, form: bool) -> Result<()> {
    let id = entry_id(id)?;
    let kind = queued_kind(app, &id, form).await;
    match kind {
        Some(kind) if app.queue.remove(kind, &id).await => println!("Removed {} {}", kind, id),
        _ => anyhow::bail!("No queued entry {}", id),
    }
    Ok(())
}

async fn cmd_requeue(app: &App, id: &str, form: bool) -> Result<()> {
    let id = entry_id(id)?;
    let kind = queued_kind(app, &id, form)
        .await
        .with_context(|| format!("No queued entry {}", id))?;
    if app.queue.requeue(kind, &id).await {
        println!("Requeued {} {}", kind, id);
    } else {
        println!("{} {} is already uploaded", kind, id);
    }
    Ok(())
}

async fn cmd_prune(app: &App) -> Result<()> {
    let pruned = app.queue.prune_uploaded().await;
    println!("Removed {} uploaded entries", pruned);
    Ok(())
}

/// Run one sync pass.
async fn cmd_sync(app: &App, force: bool) -> Result<()> {
    let engine = app.engine()?;

    if !app.monitor()?.check_reachability().await {
        if !force {
            println!(
                "Offline: {} uploads pending. Use --force to try anyway.",
                app.queue.summary().await.pending_uploads
            );
            return Ok(());
        }
        warn!("Reachability check failed, syncing anyway");
    }

    match engine.sync_now().await.context("Sync failed")? {
        SyncOutcome::Skipped => println!("A sync pass is already running"),
        SyncOutcome::Completed(report) => {
            println!("Sync completed in {:.1}s", report.duration.as_secs_f64());
            println!(
                "  Documents: {} uploaded, {} failed",
                report.documents_uploaded, report.documents_failed
            );
            println!(
                "  Forms: {} uploaded, {} failed",
                report.forms_uploaded, report.forms_failed
            );
            if report.deferred > 0 {
                println!("  Deferred: {}", report.deferred);
            }
            if report.removed_mid_pass > 0 {
                println!("  Removed while uploading: {}", report.removed_mid_pass);
            }
            println!("  Still pending: {}", report.pending_after);
        }
    }

    Ok(())
}

/// Periodically check connectivity and sync until Ctrl-C.
async fn cmd_watch(app: &App) -> Result<()> {
    let engine = Arc::new(app.engine()?);
    let monitor = app.monitor()?;
    let period = app.config.sync.periodic_interval;

    let scheduler = SyncScheduler::start_periodic_check(engine, monitor, period);
    println!("Watching every {}s, press Ctrl-C to stop", period.as_secs());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Stopping");
    scheduler.shutdown().await;
    Ok(())
}

async fn cmd_reset(app: &App) -> Result<()> {
    app.queue.reset().await.context("Failed to clear stored queue")?;
    println!("Offline queue cleared");
    Ok(())
}

async fn cmd_loan(app: &App, command: LoanCommands) -> Result<()> {
    let mut book = app.loan_book().await?;

    match command {
        LoanCommands::Types => {
            for loan_type in book.catalog().types() {
                println!(
                    "{:<12} {:<24} up to {:>10}  {:>5.2}%",
                    loan_type.id, loan_type.name, loan_type.max_amount, loan_type.interest_rate
                );
                println!("{:<12} requires: {}", "", loan_type.required_documents.join(", "));
            }
            return Ok(());
        }

        LoanCommands::Apply {
            loan_type,
            amount,
            purpose,
            notes,
        } => {
            let mut new = NewApplication::new(loan_type, amount, purpose);
            new.notes = notes;
            let id = book.create(new)?.id.clone();
            app.save_loan_book(&book).await?;
            println!("Application {} submitted", id);
        }

        LoanCommands::List => {
            if book.applications().is_empty() {
                println!("(no applications)");
            }
            let current = book.current().map(|a| a.id.clone());
            for application in book.applications() {
                let marker = if Some(&application.id) == current.as_ref() { "*" } else { " " };
                println!(
                    "{} {} {:<12} {:>10} {:<13} {}",
                    marker,
                    application.id,
                    application.loan_type,
                    application.amount,
                    application.status,
                    application.submitted_at.format("%Y-%m-%d")
                );
            }
            return Ok(());
        }

        LoanCommands::Show { id } => {
            let application = match id {
                Some(id) => book.get(&application_id(&id)?),
                None => book.current(),
            }
            .context("No such application")?;

            println!("Application {}", application.id);
            println!("  Type: {}", application.loan_type);
            println!("  Amount: {}", application.amount);
            println!("  Purpose: {}", application.purpose);
            println!("  Status: {}", application.status);
            println!("  Submitted: {}", application.submitted_at.format("%Y-%m-%d %H:%M"));
            if let (Some(by), Some(at)) = (&application.reviewed_by, application.reviewed_at) {
                println!("  Reviewed: by {} at {}", by, at.format("%Y-%m-%d %H:%M"));
            }
            if let Some(notes) = &application.notes {
                println!("  Notes: {}", notes);
            }
            println!("  Documents: {}", application.documents.len());
            for doc in &application.documents {
                println!("    {} {} ({})", doc.id, doc.name, format_bytes(doc.size));
            }
            if let Some(loan_type) = book.catalog().get(&application.loan_type) {
                let missing = application.missing_documents(&loan_type.required_documents);
                if !missing.is_empty() {
                    println!("  Missing: {}", missing.join(", "));
                }
            }
            return Ok(());
        }

        LoanCommands::Select { id } => {
            book.set_current(Some(application_id(&id)?))?;
            app.save_loan_book(&book).await?;
            println!("Current application: {}", id);
        }

        LoanCommands::Update {
            id,
            amount,
            purpose,
            notes,
        } => {
            let update = ApplicationUpdate {
                amount,
                purpose,
                notes,
            };
            book.update(&application_id(&id)?, update)?;
            app.save_loan_book(&book).await?;
            println!("Application {} updated", id);
        }

        LoanCommands::Review {
            id,
            decision,
            reviewer,
            notes,
        } => {
            let id = application_id(&id)?;
            let status = book.review(&id, decision, &reviewer, notes)?.status;
            app.save_loan_book(&book).await?;
            println!("Application {} is now {}", id, status);

            let relay = app.relay().await?;
            if relay.loan_status_update(&id, status.as_str()).await.is_ok() {
                app.save_notifications(&relay).await?;
            }
        }

        LoanCommands::Report => {
            let report = book.report();
            println!("Applications: {}", report.total_applications);
            for (status, count) in &report.by_status {
                println!("  {:<13} {}", status, count);
            }
            println!("Total requested: {}", report.total_amount);
            println!("Total approved: {}", report.approved_amount);
            println!("Approval rate: {:.1}%", report.approval_rate * 100.0);
            return Ok(());
        }
    }

    Ok(())
}

async fn cmd_notifications(app: &App, command: NotificationCommands) -> Result<()> {
    let relay = app.relay().await?;
    let center = relay.center();

    match command {
        NotificationCommands::List => {
            let center = center.read().await;
            if !center.is_enabled() {
                println!("(notifications are disabled)");
            }
            println!("{} unread", center.unread_count());
            for n in center.notifications() {
                let marker = if n.is_read { " " } else { "*" };
                println!(
                    "{} {} [{}] {} - {}",
                    marker,
                    n.timestamp.format("%Y-%m-%d %H:%M"),
                    n.severity,
                    n.title,
                    n.body
                );
                println!("    id: {}", n.id);
            }
            return Ok(());
        }

        NotificationCommands::Read { id, all } => {
            let mut center = center.write().await;
            if all {
                center.mark_all_as_read();
            } else {
                let id = id.context("Pass a notification id or --all")?;
                if !center.mark_as_read(&id) {
                    println!("Nothing to mark for {}", id);
                }
            }
        }

        NotificationCommands::Remove { id } => {
            if !center.write().await.remove(&id) {
                anyhow::bail!("No notification {}", id);
            }
        }

        NotificationCommands::Clear => {
            relay.cancel_all().await;
            center.write().await.clear_all();
        }

        NotificationCommands::Enable => {
            center.write().await.set_enabled(true);
            println!("Notifications enabled");
        }

        NotificationCommands::Disable => {
            center.write().await.set_enabled(false);
            println!("Notifications disabled");
        }

        NotificationCommands::RemindDocuments { application } => {
            relay
                .document_reminder(&application_id(&application)?)
                .await
                .context("Failed to schedule reminder")?;
        }

        NotificationCommands::RemindPayment { amount, due } => {
            relay
                .payment_reminder(amount, due)
                .await
                .context("Failed to schedule reminder")?;
        }
    }

    app.save_notifications(&relay).await
}
