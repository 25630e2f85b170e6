//! Language identifier to toolchain recipe table.
//!
//! The table is plain data: the built-in recipes live in `recipes.toml` and
//! operators can layer their own file on top at startup. Once built, a
//! [`Registry`] is never mutated.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::{error::Error, Result};

const BUILTIN_RECIPES: &str = include_str!("recipes.toml");
const PLACEHOLDERS: &[&str] = &["source", "binary", "dir", "stem"];

fn default_stem() -> String {
    "main".to_string()
}

/// How to build and run programs of one language
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolchainRecipe {
    language: String,
    #[serde(default)]
    aliases: Vec<String>,
    extension: String,
    #[serde(default = "default_stem")]
    stem: String,
    #[serde(default)]
    compile: Option<Vec<String>>,
    run: Vec<String>,
}

/// Values substituted into a recipe's command templates
#[derive(Debug, Clone)]
pub struct TemplateVars {
    pub source: String,
    pub binary: PathBuf,
    pub dir: PathBuf,
    pub stem: String,
}

/// A fully expanded command: program followed by its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolchainRecipe {
    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }

    pub fn has_compile_step(&self) -> bool {
        self.compile.is_some()
    }

    /// Source file name inside a workspace, e.g. `Main.java`
    pub fn source_file_name(&self) -> String {
        format!("{}.{}", self.stem, self.extension)
    }

    pub fn compile_command(&self, vars: &TemplateVars) -> Option<CommandLine> {
        self.compile.as_deref().map(|template| expand(template, vars))
    }

    pub fn run_command(&self, vars: &TemplateVars) -> CommandLine {
        expand(&self.run, vars)
    }

    /// Host binaries the recipe invokes directly. Programs produced inside
    /// the workspace (templated first arguments) are not included.
    pub fn required_tools(&self) -> Vec<&str> {
        let mut tools = Vec::new();
        for step in self.compile.iter().chain(std::iter::once(&self.run)) {
            if let Some(program) = step.first() {
                if !program.contains('{') && !tools.contains(&program.as_str()) {
                    tools.push(program.as_str());
                }
            }
        }
        tools
    }

    fn validate(&mut self) -> Result<()> {
        self.language = self.language.trim().to_lowercase();
        if self.language.is_empty() {
            return Err(Error::Registry("recipe with empty language".to_string()));
        }
        for alias in self.aliases.iter_mut() {
            *alias = alias.trim().to_lowercase();
            if alias.is_empty() {
                return Err(Error::Registry(format!(
                    "{}: empty alias",
                    self.language
                )));
            }
        }
        if self.extension.is_empty() || !self.extension.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(Error::Registry(format!(
                "{}: invalid extension {:?}",
                self.language, self.extension
            )));
        }
        if self.stem.is_empty()
            || !self
                .stem
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(Error::Registry(format!(
                "{}: invalid stem {:?}",
                self.language, self.stem
            )));
        }
        if self.run.is_empty() {
            return Err(Error::Registry(format!(
                "{}: empty run command",
                self.language
            )));
        }
        if matches!(&self.compile, Some(c) if c.is_empty()) {
            return Err(Error::Registry(format!(
                "{}: empty compile command",
                self.language
            )));
        }
        for arg in self.compile.iter().flatten().chain(self.run.iter()) {
            check_placeholders(&self.language, arg)?;
        }
        Ok(())
    }
}

fn check_placeholders(language: &str, arg: &str) -> Result<()> {
    let mut rest = arg;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        let end = after.find('}').ok_or_else(|| {
            Error::Registry(format!("{}: unterminated placeholder in {:?}", language, arg))
        })?;
        let name = &after[..end];
        if !PLACEHOLDERS.contains(&name) {
            return Err(Error::Registry(format!(
                "{}: unknown placeholder {{{}}}",
                language, name
            )));
        }
        rest = &after[end + 1..];
    }
    Ok(())
}

fn expand(template: &[String], vars: &TemplateVars) -> CommandLine {
    let binary = vars.binary.to_string_lossy();
    let dir = vars.dir.to_string_lossy();
    let mut expanded = template.iter().map(|arg| {
        arg.replace("{source}", &vars.source)
            .replace("{binary}", &binary)
            .replace("{dir}", &dir)
            .replace("{stem}", &vars.stem)
    });
    // validate() guarantees at least one element
    let program = expanded.next().unwrap_or_default();
    CommandLine {
        program,
        args: expanded.collect(),
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RecipeTable {
    #[serde(rename = "recipe", default)]
    recipes: Vec<ToolchainRecipe>,
}

/// Immutable, case-insensitive lookup table of recipes
#[derive(Debug, Clone)]
pub struct Registry {
    recipes: Vec<ToolchainRecipe>,
    index: HashMap<String, usize>,
}

impl Registry {
    /// The built-in table
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_RECIPES)
    }

    pub fn from_toml_str(source: &str) -> Result<Self> {
        let table: RecipeTable =
            toml::from_str(source).map_err(|e| Error::Registry(e.to_string()))?;
        Self::from_recipes(table.recipes)
    }

    /// Read a recipe file from disk
    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            Error::Registry(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&source)
    }

    pub fn from_recipes(recipes: Vec<ToolchainRecipe>) -> Result<Self> {
        let mut recipes = recipes;
        let mut index = HashMap::new();
        for (i, recipe) in recipes.iter_mut().enumerate() {
            recipe.validate()?;
            for key in std::iter::once(&recipe.language).chain(recipe.aliases.iter()) {
                if index.insert(key.clone(), i).is_some() {
                    return Err(Error::Registry(format!(
                        "identifier {:?} is defined more than once",
                        key
                    )));
                }
            }
        }
        Ok(Self { recipes, index })
    }

    /// Layer `overrides` on top of this table. A recipe whose language is
    /// already present replaces the existing one, aliases included.
    pub fn extend(self, overrides: Registry) -> Result<Self> {
        let mut recipes: Vec<ToolchainRecipe> = self
            .recipes
            .into_iter()
            .filter(|existing| {
                !overrides
                    .recipes
                    .iter()
                    .any(|r| r.language == existing.language)
            })
            .collect();
        for recipe in &overrides.recipes {
            debug!(language = %recipe.language, "Registering recipe override");
        }
        recipes.extend(overrides.recipes);
        Self::from_recipes(recipes)
    }

    pub fn resolve(&self, language: &str) -> Option<&ToolchainRecipe> {
        self.index
            .get(&language.trim().to_lowercase())
            .map(|&i| &self.recipes[i])
    }

    /// Primary identifiers, sorted
    pub fn languages(&self) -> Vec<&str> {
        let mut languages: Vec<&str> = self.recipes.iter().map(|r| r.language.as_str()).collect();
        languages.sort_unstable();
        languages
    }
}
