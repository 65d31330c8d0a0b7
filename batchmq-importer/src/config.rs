use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Splits a run into data batches and enqueues them", long_about = None)]
pub struct Config {
    #[arg(long, env = "BATCHMQ_RUN_FILE", default_value = "run.json")]
    pub run_file: String,

    #[arg(long, env = "BATCHMQ_BROKER_ENDPOINT", default_value = "http://127.0.0.1:7654")]
    pub broker_endpoint: String,
}
