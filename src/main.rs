use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;
use url::Url;

use gradportrait::api::types::OAuthProvider;
use gradportrait::credits::CreditsFlow;
use gradportrait::tier::{format_gbp, CheckoutReturn, GenerationOutcome, PrimaryAction};
use gradportrait::{
    ApiClient, ClientConfig, ComparisonViewer, EntitlementModel, GenerationRequest, JobDashboard,
    KeyringTokenStore, Navigator, PriceDisplay, RetryPolicy, SessionStore, TierReconciler,
    TokenStore, UploadFile,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Graduation portrait generation client")]
struct Args {
    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Log in with a password, or finish an OAuth callback with --token/--error
    Login {
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        token: Option<String>,
        #[arg(long)]
        error: Option<String>,
    },
    OauthUrl {
        provider: String,
    },
    Logout,
    Whoami,
    VerifyEmail {
        token: Option<String>,
        /// Send a new verification email instead
        #[arg(long)]
        resend: Option<String>,
    },
    Universities,
    Jobs {
        /// Keep polling until every job has finished
        #[arg(long)]
        watch: bool,
    },
    Tier,
    Pricing,
    Promo {
        code: String,
    },
    Checkout {
        #[arg(long)]
        promo: Option<String>,
    },
    CheckoutReturn {
        outcome: ReturnOutcome,
        #[arg(long)]
        session_id: Option<String>,
    },
    Generate {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long)]
        university: String,
        #[arg(long)]
        degree: String,
    },
    Fetch {
        image_id: i64,
        /// Also fetch the uploaded photo
        #[arg(long)]
        original: bool,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    RetryImage {
        image_id: i64,
    },
    Referrals {
        #[arg(long)]
        track: Option<String>,
    },
    BuyCredits {
        credits: u32,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ReturnOutcome {
    Success,
    Cancelled,
}

/// Prints navigation targets; the user follows them in a browser.
struct TerminalNavigator {
    login_url: Url,
}

impl Navigator for TerminalNavigator {
    fn to_login(&self) {
        eprintln!("Session ended. Log in again: {}", self.login_url);
    }

    fn open_external(&self, url: &Url) {
        println!("Open in your browser: {}", url);
    }
}

type Session = SessionStore<ApiClient>;

struct App {
    config: ClientConfig,
    api: Arc<ApiClient>,
    session: Arc<Session>,
    navigator: Arc<dyn Navigator>,
}

impl App {
    fn build(config: ClientConfig) -> Result<Self> {
        let login_url = config.frontend()?.join("login")?;
        let navigator: Arc<dyn Navigator> = Arc::new(TerminalNavigator { login_url });
        let tokens: Arc<dyn TokenStore> =
            Arc::new(KeyringTokenStore::new(&config.keyring_service));
        let api = Arc::new(ApiClient::new(&config, tokens.clone(), navigator.clone())?);
        let session = Arc::new(SessionStore::new(api.clone(), tokens, navigator.clone()));
        Ok(Self {
            config,
            api,
            session,
            navigator,
        })
    }

    fn reconciler(&self) -> TierReconciler<ApiClient, ApiClient> {
        TierReconciler::new(self.api.clone(), self.session.clone(), self.navigator.clone())
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    gradportrait::init_tracing();
    let args = Args::parse();

    let config = ClientConfig::load(args.config.as_deref()).context("Failed to load config")?;
    info!("Using API at {}", config.api_base_url);
    let ctx = App::build(config)?;

    match args.command {
        Command::Register {
            email,
            password,
            name,
        } => {
            let user = ctx.api.register(&email, &password, name.as_deref()).await?;
            println!("Registered {}. Check your inbox to verify your email.", user.email);
        }
        Command::Login {
            email,
            password,
            token,
            error,
        } => {
            let user = match (email, password) {
                (Some(email), Some(password)) => {
                    let access = ctx.api.login_with_password(&email, &password).await?;
                    ctx.session.login(&access.access_token).await?
                }
                (None, None) => Some(
                    ctx.session
                        .complete_oauth(token.as_deref(), error.as_deref())
                        .await?,
                ),
                _ => bail!("Provide both --email and --password"),
            };
            match user {
                Some(user) => println!("Logged in as {}", user.email),
                None => bail!("Login failed"),
            }
        }
        Command::OauthUrl { provider } => {
            let provider: OAuthProvider = provider.parse().map_err(anyhow::Error::msg)?;
            let url = ctx.api.oauth_authorize_url(provider)?;
            ctx.navigator.open_external(&url);
        }
        Command::Logout => {
            ctx.session.logout();
            println!("Logged out");
        }
        Command::Whoami => {
            ctx.session.init().await;
            let user = ctx.session.require_user()?;
            print_json(&user)?;
        }
        Command::VerifyEmail { token, resend } => {
            let message = match (token, resend) {
                (_, Some(email)) => ctx.api.resend_verification(&email).await?,
                (Some(token), None) => ctx.api.verify_email(&token).await?,
                (None, None) => bail!("Provide a verification token or --resend <email>"),
            };
            println!("{}", message.text());
        }
        Command::Universities => {
            for university in ctx.api.list_universities().await? {
                println!("{} ({})", university.name, university.degree_levels.join(", "));
            }
        }
        Command::Jobs { watch } => {
            ctx.session.init().await;
            ctx.session.require_user()?;
            let mut dashboard = JobDashboard::from_config(ctx.api.clone(), &ctx.config);
            dashboard.refresh().await?;
            print_jobs(&dashboard);
            if watch && dashboard.is_polling() {
                let exit = dashboard.wait_idle().await;
                info!("Polling ended: {:?}", exit);
                print_jobs(&dashboard);
            }
        }
        Command::Tier => {
            ctx.session.init().await;
            ctx.session.require_user()?;
            let snapshot = ctx.reconciler().load().await?;
            println!("{}", snapshot.tier.message);
            match snapshot.action() {
                PrimaryAction::StartFreeTrial => println!("Next: start your free trial"),
                PrimaryAction::Upgrade => {
                    println!("Next: upgrade to premium for {}", snapshot.price().render())
                }
                PrimaryAction::Generate { remaining } => {
                    println!("Next: generate ({} premium generations left)", remaining)
                }
                PrimaryAction::Exhausted => println!("All premium generations used"),
            }
        }
        Command::Pricing => {
            let pricing = ctx.api.pricing_info().await?;
            let display = PriceDisplay::from_pricing(&pricing);
            println!("Premium: {}", display.render());
            if let Some(source) = &display.discount_source {
                println!("Discount from {}", source);
            }
            if !pricing.referral_discount_eligible {
                println!(
                    "Referrals: {}/{} towards a discount",
                    pricing.referrals_completed, pricing.referrals_needed
                );
            }
        }
        Command::Promo { code } => {
            let result = ctx.reconciler().validate_promo(&code).await?;
            println!("{}", result.message);
            if result.valid {
                let pricing = ctx.api.pricing_info().await?;
                let display = PriceDisplay::from_pricing(&pricing).with_promo(&result);
                println!("Price with code: {}", display.render());
            }
        }
        Command::Checkout { promo } => {
            ctx.session.init().await;
            ctx.session.require_user()?;
            let session = ctx.reconciler().start_checkout(promo.as_deref()).await?;
            println!(
                "Checkout {} for {}",
                session.session_id,
                format_gbp(session.amount)
            );
        }
        Command::CheckoutReturn {
            outcome,
            session_id,
        } => {
            let outcome = match outcome {
                ReturnOutcome::Success => CheckoutReturn::Success { session_id },
                ReturnOutcome::Cancelled => CheckoutReturn::Cancelled,
            };
            let status = ctx.reconciler().handle_checkout_return(&outcome).await?;
            println!("{}", status.message);
        }
        Command::Generate {
            files,
            university,
            degree,
        } => {
            ctx.session.init().await;
            ctx.session.require_user()?;
            let uploads = files
                .iter()
                .map(|path| UploadFile::from_path(path))
                .collect::<Result<Vec<_>, _>>()?;
            match ctx.config.entitlement_model {
                EntitlementModel::Tier => generate_tier(&ctx, uploads, university, degree).await?,
                EntitlementModel::Credits => {
                    let flow = CreditsFlow::new(ctx.api.clone(), ctx.session.clone());
                    let job = flow.submit(uploads, &university, &degree).await?;
                    println!("Job {} queued ({} images)", job.id, job.total_images);
                }
            }
        }
        Command::Fetch {
            image_id,
            original,
            out,
        } => {
            let mut viewer = ComparisonViewer::new(ctx.api.clone(), RetryPolicy::from_config(&ctx.config))
                .with_observer(|status| info!("{:?}", status));
            viewer.show(image_id, original).await?;
            let saved = viewer.save_result(&out)?;
            println!("Saved {}", saved.display());
            if let Some(handle) = viewer.original() {
                let target = out.join(format!("original_{}.{}", image_id, handle.extension()));
                std::fs::copy(handle.path(), &target)
                    .with_context(|| format!("Failed to write {:?}", target))?;
                println!("Saved {}", target.display());
            }
        }
        Command::RetryImage { image_id } => {
            let message = ctx.api.retry_image(image_id).await?;
            println!("{}", message.text());
        }
        Command::Referrals { track } => {
            if let Some(code) = track {
                println!("{}", ctx.api.track_referral(&code).await?.text());
                return Ok(());
            }
            let link = ctx.api.referral_link().await?;
            println!("Share: {}", link.referral_link);
            println!(
                "{} of {} referrals completed",
                link.stats.completed_referrals, link.stats.referrals_needed
            );
            for referral in ctx.api.referral_list().await?.referrals {
                println!(
                    "  {} {}",
                    referral.email.as_deref().unwrap_or("(hidden)"),
                    referral.status
                );
            }
        }
        Command::BuyCredits { credits } => {
            ctx.session.init().await;
            let flow = CreditsFlow::new(ctx.api.clone(), ctx.session.clone());
            let intent = flow.buy_credits(credits).await?;
            let config = ctx.api.payment_config().await?;
            println!("Payment intent ready (key {})", config.publishable_key);
            println!("Client secret: {}", intent.client_secret);
        }
    }

    Ok(())
}

async fn generate_tier(
    ctx: &App,
    mut uploads: Vec<UploadFile>,
    university: String,
    degree_level: String,
) -> Result<()> {
    if uploads.len() != 1 {
        bail!("Tier generation takes exactly one photo");
    }
    let reconciler = ctx.reconciler();
    let snapshot = reconciler.load().await?;
    let request = GenerationRequest {
        file: uploads.remove(0),
        university,
        degree_level,
    };
    match reconciler.submit_generation(&snapshot, request).await? {
        GenerationOutcome::Submitted(job) => {
            println!("Job {} queued ({} images)", job.id, job.total_images)
        }
        GenerationOutcome::OpenPricing => {
            println!(
                "Premium required: {}. Run `checkout` to upgrade.",
                snapshot.price().render()
            )
        }
        GenerationOutcome::Unavailable(message) => println!("{}", message),
    }
    Ok(())
}

fn print_jobs<A: gradportrait::api::JobApi + ?Sized + 'static>(dashboard: &JobDashboard<A>) {
    let stats = dashboard.stats();
    println!(
        "{} jobs: {} completed, {} in progress, {} failed",
        stats.total, stats.completed, stats.in_progress, stats.failed
    );
    for job in dashboard.jobs() {
        println!(
            "  #{} {} {}/{} {}",
            job.id,
            job.status,
            job.completed_images,
            job.total_images,
            job.university.as_deref().unwrap_or("")
        );
    }
}
