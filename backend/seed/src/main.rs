use anyhow::{Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use server::{
    config::{Config, StorageKind},
    error::StorageError,
    models::{College, Gender, User, VerificationMethod, VerificationStatus},
    storage::Store,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_COLLEGE: &str = "SGGS Institute of Engineering and Technology";
const DEFAULT_DOMAIN: &str = "sggs.ac.in";

/// (first, last, gender, bio)
const TEST_STUDENTS: [(&str, &str, Gender, &str); 10] = [
    ("Arjun", "Sharma", Gender::Male, "Computer Science student, loves coding and gaming"),
    ("Priya", "Patel", Gender::Female, "Mechanical Engineering student, passionate about robotics"),
    ("Rahul", "Kumar", Gender::Male, "Electronics student, music enthusiast"),
    ("Sneha", "Singh", Gender::Female, "Civil Engineering student, loves photography"),
    ("Amit", "Gupta", Gender::Male, "IT student, blockchain enthusiast"),
    ("Kavya", "Reddy", Gender::Female, "Chemical Engineering student, loves dancing"),
    ("Vikram", "Joshi", Gender::Male, "Electrical Engineering student, sports lover"),
    ("Ananya", "Mehta", Gender::Female, "Computer Science student, AI researcher"),
    ("Rohan", "Verma", Gender::Male, "Mechanical Engineering student, car enthusiast"),
    ("Ishita", "Agarwal", Gender::Female, "Electronics student, loves reading and writing"),
];

#[derive(Subcommand, Debug)]
enum Commands {
    /// Insert a college (the default one unless both flags are given)
    Colleges {
        #[arg(long, requires = "domain")]
        name: Option<String>,

        #[arg(long, requires = "name")]
        domain: Option<String>,
    },
    /// Insert ten verified test students into an existing college
    TestUsers {
        #[arg(long, default_value = DEFAULT_DOMAIN)]
        domain: String,
    },
}

#[derive(Parser, Debug)]
#[command(name = "seed")]
#[command(about = "Seed colleges and test students", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

fn test_student(
    (first, last, gender, bio): (&str, &str, Gender, &str),
    college: &College,
) -> User {
    let tag = match gender {
        Gender::Male => "male",
        Gender::Female => "female",
        Gender::Other => "other",
    };

    let mut user = User::new(&format!(
        "{}.{tag}@{}",
        first.to_lowercase(),
        college.email_domain
    ));
    user.first_name = Some(first.to_string());
    user.last_name = Some(last.to_string());
    user.display_name = Some(format!("{first} {}", &last[..1]));
    user.bio = Some(bio.to_string());
    user.gender = Some(gender);
    user.college_id = Some(college.id);
    user.verification_status = VerificationStatus::Verified;
    user.verification_method = Some(VerificationMethod::Email);
    user.last_active_at = Some(Utc::now());
    user
}

async fn seed_college(store: &Store, name: String, domain: &str) -> Result<()> {
    match store.create_college(College::new(name, domain)).await {
        Ok(college) => info!(id = %college.id, domain = %college.email_domain, "Created college"),
        Err(StorageError::Duplicate(_)) => warn!(domain, "College already exists"),
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

async fn seed_students(store: &Store, domain: &str) -> Result<()> {
    let Some(college) = store.get_college_by_domain(domain).await? else {
        bail!("No college with domain {domain}, run `seed colleges` first");
    };

    let mut created = 0;
    for student in TEST_STUDENTS {
        let user = test_student(student, &college);
        let email = user.email.clone();

        match store.create_user(user).await {
            Ok(_) => {
                created += 1;
                info!(%email, "Created user");
            }
            Err(StorageError::Duplicate(_)) => warn!(%email, "User already exists"),
            Err(e) => return Err(e.into()),
        }
    }

    info!(created, "Test users seeded, log in with any of them, no password needed");

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let config = Config::load()?;
    if config.storage == StorageKind::Memory {
        warn!("STORAGE=memory, seeded rows vanish when this process exits");
    }

    let store = Store::connect(&config).await?;

    match cli.command {
        Commands::Colleges { name, domain } => match (name, domain) {
            (Some(name), Some(domain)) => seed_college(&store, name, &domain).await,
            _ => seed_college(&store, DEFAULT_COLLEGE.to_string(), DEFAULT_DOMAIN).await,
        },
        Commands::TestUsers { domain } => seed_students(&store, &domain.to_ascii_lowercase()).await,
    }
}
