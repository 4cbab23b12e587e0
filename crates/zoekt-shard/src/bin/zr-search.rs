// Copyright 2025 HyperZoekt Project
// Derived from sourcegraph/zoekt (https://github.com/sourcegraph/zoekt)
// Copyright 2016 Google Inc. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use zoekt_shard::{DocReader, LoadOptions, MergeOpts, Query, SearchOptions, SearchResult};

#[derive(Parser, Debug)]
#[command(name = "zr-search", about = "Search one or more zoekt shards")]
struct Args {
    /// Shard files to search
    #[arg(required = true)]
    shards: Vec<PathBuf>,
    /// Pattern to search for (a substring unless --regex is given)
    #[arg(short, long)]
    query: String,
    /// Treat the pattern as a regular expression
    #[arg(long)]
    regex: bool,
    #[arg(long)]
    case_sensitive: bool,
    /// Match file names only
    #[arg(long)]
    file_name: bool,
    /// Lines of context around each match
    #[arg(long, default_value_t = 0)]
    context: usize,
    /// Print search statistics to stderr
    #[arg(long)]
    stats: bool,
    /// Emit the whole result as JSON
    #[arg(long)]
    json: bool,
    /// TOML file with loader options
    #[arg(long, env = "ZOEKT_CONFIG")]
    config: Option<PathBuf>,
    /// Copy shard contents into memory
    #[arg(long)]
    in_memory_content: bool,
    /// Stop after this many files
    #[arg(long, default_value_t = 0)]
    max_files: usize,
}

fn build_query(args: &Args) -> Query {
    let q = if args.regex {
        Query::regexp(&args.query)
    } else {
        Query::substring(&args.query)
    };
    let q = q.case_sensitive(args.case_sensitive);
    if args.file_name {
        q.file_name_only()
    } else {
        q
    }
}

fn print_text(res: &SearchResult, out: &mut impl Write) -> Result<()> {
    for fm in &res.files {
        for lm in &fm.line_matches {
            if lm.file_name {
                writeln!(out, "{}/{}", fm.repository, fm.file_name)?;
                continue;
            }
            if !lm.before.is_empty() {
                writeln!(out, "{}", String::from_utf8_lossy(&lm.before))?;
            }
            writeln!(
                out,
                "{}/{}:{}:{}",
                fm.repository,
                fm.file_name,
                lm.line_number,
                String::from_utf8_lossy(&lm.line)
            )?;
            if !lm.after.is_empty() {
                writeln!(out, "{}", String::from_utf8_lossy(&lm.after))?;
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let args = Args::parse();
    let load = LoadOptions::load(MergeOpts {
        config_path: args.config.clone(),
        cli_in_memory_content: args.in_memory_content.then_some(true),
        cli_read_sidecar_meta: None,
    })
    .context("loading configuration")?;

    let reader = DocReader::open(&args.shards, &load).context("opening shards")?;
    let docs: u32 = reader.shards().iter().map(|s| s.num_docs()).sum();
    tracing::info!(shards = reader.shards().len(), docs, "opened shards");
    let q = build_query(&args);
    tracing::debug!(query = %q, shards = args.shards.len(), "searching");

    let opts = SearchOptions {
        num_context_lines: args.context,
        max_doc_display_count: args.max_files,
        ..Default::default()
    };
    let res = reader.search_all(&q, &opts);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if args.json {
        serde_json::to_writer_pretty(&mut out, &res)?;
        writeln!(out)?;
    } else {
        print_text(&res, &mut out)?;
    }
    if args.stats {
        eprintln!("{}", serde_json::to_string(&res.stats)?);
    }
    let shards = reader.shards().len();
    reader.close();
    tracing::info!(shards, "closed shards");
    Ok(())
}
