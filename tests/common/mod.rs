//! Shared fixture: a tiny agent toolkit plus two repositories that use it.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use api_indexer::{AppConfig, RepositoryConfig, Settings};
use tempfile::TempDir;

pub const VERSION: &str = "v1.0.0";

pub fn write(dir: &Path, name: &str, content: &str) {
    let path = dir.join(name);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

pub struct Fixture {
    pub target: TempDir,
    pub samples: Vec<TempDir>,
    pub cache: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let target = TempDir::new().unwrap();
        write_library(target.path());

        let first = TempDir::new().unwrap();
        write(
            first.path(),
            "bot.py",
            "from adklib import Agent, FunctionTool\nfrom adklib.ghost import Phantom\n\nagent = Agent(\"bot\", tools=[FunctionTool(print)])\nPhantom()\n",
        );
        write(
            first.path(),
            "helper.py",
            "from adklib import Agent\n\nAgent(\"helper\").run(\"hi\")\n",
        );

        let second = TempDir::new().unwrap();
        write(
            second.path(),
            "app/main.py",
            "import adklib\nfrom adklib.ghost import Phantom\n\ndef main():\n    tool = adklib.FunctionTool(len)\n    adklib.Agent(\"main\", tools=[tool])\n    Phantom()\n",
        );

        Self {
            target,
            samples: vec![first, second],
            cache: TempDir::new().unwrap(),
        }
    }

    pub fn target_path(&self) -> &Path {
        self.target.path()
    }

    pub fn sample_paths(&self) -> Vec<PathBuf> {
        self.samples.iter().map(|s| s.path().to_path_buf()).collect()
    }

    pub fn repository(&self) -> RepositoryConfig {
        RepositoryConfig {
            name: "adklib".to_string(),
            url: self.target.path().display().to_string(),
            version: VERSION.to_string(),
            namespaces: vec!["adklib".to_string()],
            samples: self
                .samples
                .iter()
                .map(|s| s.path().display().to_string())
                .collect(),
            ..Default::default()
        }
    }

    pub fn config(&self) -> AppConfig {
        AppConfig {
            settings: Settings {
                cache_dir: self.cache.path().to_path_buf(),
                page_size: 2,
                ..Default::default()
            },
            repositories: vec![self.repository()],
            ..Default::default()
        }
    }

    pub fn shared_config(&self) -> Arc<AppConfig> {
        Arc::new(self.config())
    }
}

pub fn write_library(root: &Path) {
    write(
        root,
        "adklib/__init__.py",
        "\"\"\"Tiny agent toolkit.\"\"\"\nfrom adklib.agents import Agent, make_agent\nfrom adklib.tools import FunctionTool, ToolConfig\n",
    );
    write(
        root,
        "adklib/tools.py",
        r#""""Tool primitives."""


class ToolConfig:
    """Settings for a tool."""

    def __init__(self, name: str, timeout: float = 30.0):
        self.name = name
        self.timeout = timeout


class FunctionTool:
    """Wraps a plain function so an agent can call it."""

    def __init__(self, func, config=None):
        self.func = func
        self.config = config

    def __call__(self, *args, **kwargs):
        return self.func(*args, **kwargs)

    def _bind(self):
        pass
"#,
    );
    write(
        root,
        "adklib/agents.py",
        r#""""Agents."""
from adklib.tools import FunctionTool, ToolConfig


class Agent:
    """Runs a model with tools attached."""

    def __init__(self, name: str, tools=None):
        self.name = name
        self.tools = [FunctionTool(t, ToolConfig(name)) for t in tools or []]

    def run(self, prompt: str) -> str:
        """Run the agent on one prompt.

        Returns the final answer.
        """
        return prompt

    class Options:
        """Per-agent knobs."""

        def describe(self) -> str:
            return "options"


def make_agent(name: str) -> Agent:
    """Create an agent with no tools."""
    return Agent(name)
"#,
    );
    write(root, "adklib/broken.py", "def broken(:\n    pass\n");
}
