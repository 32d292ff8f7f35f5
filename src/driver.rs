//! Orchestrates the whole pipeline for one template: read, compile, run,
//! post-interpolate, and decide where the rendered body goes. Grounded on
//! `template.py`'s `fill_template`/`preprocess`/`warning`/`fix_module_names`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::TemplateError;
use crate::interpolate::{self, EnvProvider, SecretProvider, SettingsFileProvider};
use crate::lexer::Lexer;
use crate::parser;
use crate::report::ErrorReport;
use crate::vm::{Value, Vm};

const PROVENANCE_WARNING: &str = "\n\
#\n\
# WARNING: This file was created automatically from the template located in:\n\
#   __FILE__\n\
# Any changes made here will be lost the next time the template is processed.\n\
# Please update the template file to make durable changes.\n\
#\n";

#[derive(Debug, Default, Clone)]
pub struct RunOptions {
    pub input_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

/// Where a run's rendered body ended up.
#[derive(Debug, PartialEq)]
pub enum RenderedTo {
    File(PathBuf),
    Stdout(String),
}

pub fn run_template(
    template_file: &str,
    mut env: HashMap<String, Value>,
    argv: Vec<Value>,
    options: &RunOptions,
    secrets: &dyn SecretProvider,
) -> Result<RenderedTo, TemplateError> {
    let resolved = match &options.input_dir {
        Some(dir) => dir.join(template_file),
        None => PathBuf::from(template_file),
    };

    env.entry("__FILE__".to_owned())
        .or_insert_with(|| Value::Str(resolved.to_string_lossy().into_owned()));

    let source = fs::read_to_string(&resolved)?;
    let tokens = Lexer::new(&source).lex()?;
    let program = parser::compile(tokens)?;

    let mut vm = Vm::new(env, argv);
    vm.load(program)?;
    vm.execute()?;

    let rendered = vm.output.join("");

    let mut report = ErrorReport::new();
    let env_provider = EnvProvider;
    let settings_provider = SettingsFileProvider::default();
    let body = interpolate::interpolate(&rendered, secrets, &env_provider, &settings_provider, &mut report);
    report.into_result().map_err(TemplateError::Interpolate)?;

    let save_path = vm
        .outfile
        .as_ref()
        .map(PathBuf::from)
        .or_else(|| strip_template_suffix(&resolved));

    let Some(mut save_path) = save_path else {
        println!("{body}");
        return Ok(RenderedTo::Stdout(body));
    };

    if let Some(output_dir) = &options.output_dir {
        save_path = match &options.input_dir {
            Some(input_dir) => replace_path_prefix(&save_path, input_dir, output_dir),
            None => output_dir.join(&save_path),
        };
    }

    let save_path = sanitize_output_name(&save_path);

    if let Some(parent) = save_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let header = provenance_header(&resolved, &save_path);
    fs::write(&save_path, format!("{header}{body}"))?;

    Ok(RenderedTo::File(save_path))
}

fn strip_template_suffix(path: &Path) -> Option<PathBuf> {
    path.to_string_lossy().strip_suffix(".template").map(PathBuf::from)
}

/// `savepath.replace(input_dir, output_dir)` in the original: a literal
/// substring replacement, not a path-prefix join.
fn replace_path_prefix(path: &Path, from: &Path, to: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    let from_str = from.to_string_lossy();
    let to_str = to.to_string_lossy();
    PathBuf::from(path_str.replace(from_str.as_ref(), to_str.as_ref()))
}

/// Ports `fix_module_names`: dots before the final extension become dashes,
/// so a `.foo.py.template` source can produce a path that is still a legal
/// module name in conventional source trees.
fn sanitize_output_name(path: &Path) -> PathBuf {
    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    let file_name = path.file_name().and_then(|f| f.to_str()).unwrap_or_default();
    let sanitized = match file_name.rsplit_once('.') {
        Some((base, ext)) => format!("{}.{}", base.replace('.', "-"), ext),
        None => file_name.to_owned(),
    };
    dir.join(sanitized)
}

/// Ports `warning()`: the comment prefix is chosen from the output
/// extension, and `__FILE__` is replaced with the template path relative to
/// the common directory of template and output, not the bare path.
fn provenance_header(template_path: &Path, save_path: &Path) -> String {
    let file_name = save_path.file_name().and_then(|f| f.to_str()).unwrap_or_default();
    let ext = if file_name == "Dockerfile" {
        "Dockerfile"
    } else {
        save_path.extension().and_then(|e| e.to_str()).unwrap_or("")
    };
    let comment = match ext {
        "py" | "sh" | "json" | "yaml" | "Dockerfile" => "#",
        "c" | "cpp" | "C" | "java" => "//",
        "puml" | "plantuml" => "'",
        _ => "#",
    };

    let template_str = template_path.to_string_lossy();
    let relative = match common_dir(template_path, save_path) {
        Some(prefix) if template_str.starts_with(prefix.as_str()) => {
            template_str[prefix.len()..].to_owned()
        }
        _ => template_str.into_owned(),
    };

    PROVENANCE_WARNING.replace('#', comment).replace("__FILE__", &relative)
}

/// The common leading path components of `a` and `b`, joined with `/` and
/// suffixed with a trailing separator, or `None` if they share nothing.
fn common_dir(a: &Path, b: &Path) -> Option<String> {
    let a_comps: Vec<_> = a.components().collect();
    let b_comps: Vec<_> = b.components().collect();
    let mut common = Vec::new();
    for (x, y) in a_comps.iter().zip(b_comps.iter()) {
        if x == y {
            common.push(*x);
        } else {
            break;
        }
    }
    if common.is_empty() {
        return None;
    }
    let mut joined = common
        .iter()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");
    joined.push('/');
    Some(joined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpolate::NoSecrets;
    use std::sync::atomic::{AtomicU32, Ordering};

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    fn scratch_dir() -> PathBuf {
        let id = COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!("tmplc-driver-test-{}-{id}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn definition_and_conditional_renders_to_stdout() {
        let dir = scratch_dir();
        let tpl = dir.join("plain.txt");
        fs::write(&tpl, "#define FOO\n#ifdef FOO\nyes\n#endif\n").unwrap();

        let result = run_template(
            tpl.to_str().unwrap(),
            HashMap::new(),
            Vec::new(),
            &RunOptions::default(),
            &NoSecrets,
        )
        .unwrap();

        assert_eq!(result, RenderedTo::Stdout("yes\n".to_owned()));
    }

    #[test]
    fn ifndef_inversion_picks_branch_by_definedness() {
        let dir = scratch_dir();
        let tpl = dir.join("plain.txt");
        fs::write(&tpl, "#ifndef X\nA\n#else\nB\n#endif\n").unwrap();

        let undefined = run_template(
            tpl.to_str().unwrap(),
            HashMap::new(),
            Vec::new(),
            &RunOptions::default(),
            &NoSecrets,
        )
        .unwrap();
        assert_eq!(undefined, RenderedTo::Stdout("A\n".to_owned()));

        let mut env = HashMap::new();
        env.insert("X".to_owned(), Value::Bool(true));
        let defined = run_template(
            tpl.to_str().unwrap(),
            env,
            Vec::new(),
            &RunOptions::default(),
            &NoSecrets,
        )
        .unwrap();
        assert_eq!(defined, RenderedTo::Stdout("B\n".to_owned()));
    }

    #[test]
    fn parallel_foreach_binds_arguments_in_order() {
        let dir = scratch_dir();
        let tpl = dir.join("plain.txt");
        fs::write(
            &tpl,
            "#template @N, @V\n#for @A, @B in @N, @V\n@A=@B\n#endfor\n",
        )
        .unwrap();

        let argv = vec![
            Value::List(vec![Value::Str("x".into()), Value::Str("y".into())]),
            Value::List(vec![Value::Str("1".into()), Value::Str("2".into())]),
        ];

        let result = run_template(
            tpl.to_str().unwrap(),
            HashMap::new(),
            argv,
            &RunOptions::default(),
            &NoSecrets,
        )
        .unwrap();

        match result {
            RenderedTo::Stdout(body) => {
                assert!(body.contains("WARNING"));
                assert!(body.ends_with("x=1\ny=2\n"));
            }
            other => panic!("expected stdout, got {other:?}"),
        }
    }

    #[test]
    fn outfile_directive_writes_relative_to_template_directory() {
        let dir = scratch_dir();
        let tpl = dir.join("foo.py.template");
        fs::write(&tpl, "#outfile \"out.py\"\nbody\n").unwrap();

        let result = run_template(
            tpl.to_str().unwrap(),
            HashMap::new(),
            Vec::new(),
            &RunOptions::default(),
            &NoSecrets,
        )
        .unwrap();

        let expected = dir.join("out.py");
        assert_eq!(result, RenderedTo::File(expected.clone()));
        let written = fs::read_to_string(&expected).unwrap();
        assert!(written.contains("WARNING"));
        assert!(written.ends_with("body\n"));
    }

    #[test]
    fn template_suffix_is_stripped_when_no_outfile_directive() {
        let dir = scratch_dir();
        let tpl = dir.join("config.json.template");
        fs::write(&tpl, "{}\n").unwrap();

        let result = run_template(
            tpl.to_str().unwrap(),
            HashMap::new(),
            Vec::new(),
            &RunOptions::default(),
            &NoSecrets,
        )
        .unwrap();

        assert_eq!(result, RenderedTo::File(dir.join("config.json")));
    }

    #[test]
    fn sanitize_output_name_dashes_internal_dots() {
        let sanitized = sanitize_output_name(Path::new("out/my.module.name.py"));
        assert_eq!(sanitized, Path::new("out/my-module-name.py"));
    }
}
