//! Compiling every unit of a batch.
//!
//! Sources are read and compiled on the rayon pool (under `--tokens` they
//! are only lexed, and the token dump replaces the VM code). Outputs are then
//! written in input order, so `--fail-fast` sees failures in the same order
//! the user listed the units.
use std::{
    fs, io,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context};
use jackc::{
    compile,
    compiler::scan_class_name,
    CompileError, CompileOptions, CompiledClass, KnownTypes,
};
use rayon::prelude::*;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::tokens;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub source: PathBuf,
    /// File stem, which must equal the declared class name
    pub name: Box<str>,
}

impl Unit {
    fn from_path(path: &Path) -> anyhow::Result<Self> {
        let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
            bail!("{} has no usable file name", path.display());
        };
        Ok(Self {
            source: path.to_path_buf(),
            name: name.into(),
        })
    }

    /// `<dir>/<Name><suffix>`, where `dir` defaults to the source's directory.
    pub fn target(&self, out_dir: Option<&Path>, suffix: &str) -> PathBuf {
        let dir = out_dir
            .or_else(|| self.source.parent())
            .unwrap_or(Path::new("."));
        dir.join(format!("{}{suffix}", self.name))
    }
}

fn is_jack(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "jack")
}

/// Expands directories one level deep, in file name order.
pub fn discover(paths: &[PathBuf]) -> anyhow::Result<Vec<Unit>> {
    let mut units = Vec::new();
    for path in paths {
        let metadata =
            fs::metadata(path).with_context(|| format!("cannot read {}", path.display()))?;
        if metadata.is_dir() {
            for entry in WalkDir::new(path)
                .min_depth(1)
                .max_depth(1)
                .sort_by_file_name()
            {
                let entry = entry.with_context(|| format!("cannot scan {}", path.display()))?;
                if entry.file_type().is_file() && is_jack(entry.path()) {
                    units.push(Unit::from_path(entry.path())?);
                }
            }
        } else if is_jack(path) {
            units.push(Unit::from_path(path)?);
        } else {
            bail!("{} is not a .jack file", path.display());
        }
    }
    if units.is_empty() {
        bail!("no .jack files found");
    }
    Ok(units)
}

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub out_dir: Option<PathBuf>,
    pub tokens: bool,
    pub externs: Vec<String>,
    pub fail_fast: bool,
}

#[derive(Debug)]
pub enum Failure {
    Compile(CompileError),
    Io(anyhow::Error),
}

impl Failure {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Compile(error) => error.kind_name(),
            Self::Io(_) => "IOError",
        }
    }
}

#[derive(Debug)]
pub enum Status {
    Written(PathBuf),
    Failed(Failure),
    /// Not written because an earlier unit failed under `--fail-fast`
    Skipped,
}

#[derive(Debug)]
pub struct Outcome<'u> {
    pub unit: &'u Unit,
    /// Empty when the source itself could not be read
    pub source: String,
    pub status: Status,
}

impl Outcome<'_> {
    pub fn failed(&self) -> bool {
        matches!(self.status, Status::Failed(_))
    }
}

/// What a unit turns into: VM code, or under `--tokens` only its token dump.
enum Output {
    Vm(CompiledClass),
    Tokens(String),
}

impl BatchOptions {
    fn target(&self, unit: &Unit) -> PathBuf {
        let suffix = if self.tokens { "T.xml" } else { ".vm" };
        unit.target(self.out_dir.as_deref(), suffix)
    }
}

pub fn run<'u>(units: &'u [Unit], options: &BatchOptions) -> Vec<Outcome<'u>> {
    let sources: Vec<Result<String, Failure>> = units
        .par_iter()
        .map(|unit| {
            fs::read_to_string(&unit.source)
                .with_context(|| format!("cannot read {}", unit.source.display()))
                .map_err(Failure::Io)
        })
        .collect();

    let mut known_types = KnownTypes::platform();
    known_types.extend(options.externs.iter().map(String::as_str));
    known_types.extend(sources.iter().flatten().filter_map(|s| scan_class_name(s)));
    debug!(count = known_types.len(), "collected known types");

    let processed: Vec<(String, Result<Output, Failure>)> = sources
        .into_par_iter()
        .zip(units)
        .map(|(source, unit)| match source {
            Ok(source) => {
                let result = if options.tokens {
                    tokens::dump(&source)
                        .map(Output::Tokens)
                        .map_err(|error| Failure::Compile(error.into()))
                } else {
                    compile_unit(unit, &source, &known_types).map(Output::Vm)
                };
                (source, result)
            }
            Err(failure) => (String::new(), Err(failure)),
        })
        .collect();

    let mut failed = false;
    processed
        .into_iter()
        .zip(units)
        .map(|((source, result), unit)| {
            let status = if failed && options.fail_fast {
                Status::Skipped
            } else {
                match result.and_then(|output| write_output(unit, &output, options)) {
                    Ok(target) => Status::Written(target),
                    Err(failure) => {
                        failed = true;
                        warn!(unit = %unit.source.display(), kind = failure.kind_name(), "unit failed");
                        discard_output(&options.target(unit));
                        Status::Failed(failure)
                    }
                }
            };
            Outcome {
                unit,
                source,
                status,
            }
        })
        .collect()
}

pub fn failure_count(outcomes: &[Outcome<'_>]) -> usize {
    outcomes.iter().filter(|outcome| outcome.failed()).count()
}

fn compile_unit(
    unit: &Unit,
    source: &str,
    known_types: &KnownTypes,
) -> Result<CompiledClass, Failure> {
    let options = CompileOptions {
        known_types: known_types.clone(),
        expected_class: Some(unit.name.clone()),
    };
    compile(source, &options).map_err(Failure::Compile)
}

fn write_output(unit: &Unit, output: &Output, options: &BatchOptions) -> Result<PathBuf, Failure> {
    let target = options.target(unit);
    match output {
        Output::Vm(class) => {
            write_file(&target, |out| class.write_to(out))?;
            info!(
                unit = %unit.source.display(),
                target = %target.display(),
                instructions = class.instructions.len(),
                "compiled unit"
            );
        }
        Output::Tokens(xml) => {
            write_file(&target, |out| io::Write::write_all(out, xml.as_bytes()))?;
            info!(unit = %unit.source.display(), target = %target.display(), "dumped tokens");
        }
    }
    Ok(target)
}

/// Never leaves a partially written file behind.
fn write_file(
    path: &Path,
    write: impl FnOnce(&mut io::BufWriter<fs::File>) -> io::Result<()>,
) -> Result<(), Failure> {
    let written = fs::File::create(path).and_then(|file| {
        let mut out = io::BufWriter::new(file);
        write(&mut out)?;
        io::Write::flush(&mut out)
    });
    written.map_err(|error| {
        _ = fs::remove_file(path);
        Failure::Io(anyhow::Error::new(error).context(format!("cannot write {}", path.display())))
    })
}

fn discard_output(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => warn!(path = %path.display(), "removed stale output"),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => warn!(path = %path.display(), %error, "cannot remove stale output"),
    }
}
