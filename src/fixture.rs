use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::directive::DirectiveRegistry;
use crate::error::{Error, FixtureLoadError, Result};
use crate::parser::FixtureParser;
use crate::types::TestFixture;

pub const FIXTURE_EXTENSION: &str = "fixture";

/// Every `.fixture` file under `paths`. Directories are walked recursively; each directory's
/// files come out sorted, and explicitly named files are taken as given.
pub fn fixture_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>, FixtureLoadError> {
    let mut files = Vec::new();
    for p in paths {
        if !p.exists() {
            return Err(FixtureLoadError::Missing(p.clone()));
        }
        if p.is_dir() {
            let before = files.len();
            for entry in WalkDir::new(p).sort_by_file_name() {
                let entry = entry?;
                if entry.file_type().is_file()
                    && entry.path().extension().is_some_and(|ext| ext == FIXTURE_EXTENSION)
                {
                    files.push(entry.path().to_path_buf());
                }
            }
            if files.len() == before {
                return Err(FixtureLoadError::NoFixtureFiles(p.clone()));
            }
        } else {
            files.push(p.clone());
        }
    }
    Ok(files)
}

/// The fixture name of a file is its stem.
pub fn fixture_name(file: &Path) -> String {
    file.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "fixture".to_string())
}

/// Parse one fixture file. A file without test cases is an error.
pub fn load_fixture(parser: &FixtureParser<'_>, file: &Path) -> Result<TestFixture> {
    let text = fs::read_to_string(file).map_err(|source| FixtureLoadError::Io {
        path: file.to_path_buf(),
        source,
    })?;
    let fixture = parser.parse(&fixture_name(file), &file.display().to_string(), &text)?;
    if fixture.cases.is_empty() {
        return Err(FixtureLoadError::NoTestCases(file.to_path_buf()).into());
    }
    debug!(file = %file.display(), cases = fixture.cases.len(), "loaded fixture");
    Ok(fixture)
}

/// What loading produced: the fixtures that parsed, and each file that did not with its error.
#[derive(Debug, Default)]
pub struct LoadedFixtures {
    pub fixtures: Vec<TestFixture>,
    pub failures: Vec<(PathBuf, Error)>,
}

/// Load every fixture under `paths`. A file that cannot be read or parsed only loses that
/// fixture; discovering the files at all must succeed.
pub fn load_fixtures(paths: &[PathBuf], registry: &DirectiveRegistry) -> Result<LoadedFixtures> {
    let parser = FixtureParser::new(registry)?;
    let files = fixture_files(paths)?;
    info!(count = files.len(), "loading fixture files");
    let mut loaded = LoadedFixtures::default();
    for file in files {
        match load_fixture(&parser, &file) {
            Ok(fixture) => loaded.fixtures.push(fixture),
            Err(e) => {
                warn!(file = %file.display(), "fixture not loaded: {e}");
                loaded.failures.push((file, e));
            }
        }
    }
    Ok(loaded)
}
