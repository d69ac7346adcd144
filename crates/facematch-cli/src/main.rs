use anyhow::Result;
use clap::{Parser, Subcommand};
use facematch_core::{ComparisonResult, FaceAnalysis, FaceProcessor, ModelConfig};
use std::path::PathBuf;
use std::process::ExitCode;

mod worker;

#[derive(Parser)]
#[command(name = "facematch", about = "Compare faces in two images")]
struct Cli {
    /// Directory containing the ONNX models (default: $FACEMATCH_MODEL_DIR or ./models)
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,
    /// Skip gender detection
    #[arg(long, global = true)]
    no_gender: bool,
    /// Skip age detection
    #[arg(long, global = true)]
    no_age: bool,
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decide whether two images show the same person
    Compare { image1: PathBuf, image2: PathBuf },
    /// Detect a face and estimate gender and age
    Analyze { image: PathBuf },
    /// Show which models are loaded
    Models,
}

impl Cli {
    fn model_config(&self) -> ModelConfig {
        let mut config = match &self.model_dir {
            Some(dir) => ModelConfig::with_model_dir(dir),
            None => ModelConfig::default(),
        };
        config.gender_enabled = !self.no_gender;
        config.age_enabled = !self.no_age;
        config
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Compare { image1, image2 } = &cli.command {
        if !image1.is_file() || !image2.is_file() {
            println!("Please load both images before comparing.");
            return Ok(ExitCode::FAILURE);
        }
    }

    let processor = FaceProcessor::load(&cli.model_config())?;

    match cli.command {
        Commands::Compare { image1, image2 } => {
            let handle = worker::spawn_worker(processor)?;
            if !cli.json {
                println!("Comparing images, please wait...");
            }
            let result = handle.compare(image1, image2).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", render_comparison(&result));
            }
            Ok(if result.success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Commands::Analyze { image } => {
            let handle = worker::spawn_worker(processor)?;
            let analysis = handle.analyze(image).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&analysis)?);
            } else if analysis.face_detected {
                println!("{}", render_analysis(&analysis));
            } else {
                println!("No face detected.");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Models => {
            let status = processor.status();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("gender:  {:?}", status.gender);
                println!("age:     {:?}", status.age);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn demographic(label: &str, confidence: f32) -> String {
    match label {
        "Unknown" | "Disabled" => label.to_string(),
        _ => format!("{label} ({confidence:.1}%)"),
    }
}

fn render_analysis(analysis: &FaceAnalysis) -> String {
    format!(
        "Gender: {}, Age: {}",
        demographic(&analysis.gender, analysis.gender_confidence),
        demographic(&analysis.age_bucket, analysis.age_confidence)
    )
}

fn render_comparison(result: &ComparisonResult) -> String {
    let mut lines = vec![result.message.clone()];
    if result.success {
        lines.push(format!("Likelihood: {:.2}%", result.likelihood));
    }
    for (n, analysis) in [(1, &result.analysis1), (2, &result.analysis2)] {
        if analysis.face_detected {
            lines.push(format!("Image {n}: {}", render_analysis(analysis)));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use facematch_core::Prediction;

    fn analysis(gender: &str, age: &str) -> FaceAnalysis {
        FaceAnalysis::detected(facematch_core::Embedding::new(vec![0.0]))
            .with_demographics(Prediction::new(gender, 97.26), Prediction::new(age, 41.0))
    }

    #[test]
    fn test_render_match() {
        let result = ComparisonResult {
            success: true,
            message: "These images are of the same person.".into(),
            likelihood: 63.5,
            is_same_person: true,
            analysis1: analysis("Female", "(25-32)"),
            analysis2: analysis("Female", "(38-43)"),
        };
        let text = render_comparison(&result);
        assert_eq!(
            text,
            "These images are of the same person.\n\
             Likelihood: 63.50%\n\
             Image 1: Gender: Female (97.3%), Age: (25-32) (41.0%)\n\
             Image 2: Gender: Female (97.3%), Age: (38-43) (41.0%)"
        );
    }

    #[test]
    fn test_render_missing_face_omits_likelihood() {
        let result = ComparisonResult {
            analysis2: analysis("Male", "Disabled"),
            ..ComparisonResult::failure("Could not detect a face in image 1.")
        };
        assert_eq!(
            render_comparison(&result),
            "Could not detect a face in image 1.\nImage 2: Gender: Male (97.3%), Age: Disabled"
        );
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::parse_from(["facematch", "--no-age", "--model-dir", "/m", "compare", "a.png", "b.png"]);
        let cfg = cli.model_config();
        assert!(cfg.gender_enabled);
        assert!(!cfg.age_enabled);
        assert_eq!(cfg.model_dir, PathBuf::from("/m"));
        assert!(matches!(cli.command, Commands::Compare { .. }));
    }
}
