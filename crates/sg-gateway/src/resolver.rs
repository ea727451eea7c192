//! Command resolution from the `[command]` template

use async_trait::async_trait;

use sg_core::config::{CommandConfig, USER_PLACEHOLDER};
use sg_core::error::ResolveError;
use sg_core::{CommandResolver, CommandSpec, UserId};

/// Builds each session's command from a fixed template
///
/// Every `{user}` in the arguments becomes the authenticated user. Users
/// whose IDs aren't plain (see [`UserId::is_plain`]) are refused.
#[derive(Debug, Clone)]
pub struct TemplateResolver {
    template: CommandConfig,
}

impl TemplateResolver {
    pub fn new(template: CommandConfig) -> Self {
        Self { template }
    }

    /// Expand the template for `user` without validating it
    fn expand(&self, user: &UserId) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.template.program).args(
            self.template
                .args
                .iter()
                .map(|arg| arg.replace(USER_PLACEHOLDER, user.as_str())),
        );
        for (key, value) in &self.template.env {
            spec = spec.env(key, value);
        }
        spec.cwd = self.template.cwd.clone();
        spec
    }
}

#[async_trait]
impl CommandResolver for TemplateResolver {
    async fn resolve(&self, user: &UserId) -> Result<CommandSpec, ResolveError> {
        if !user.is_plain() {
            return Err(ResolveError::InvalidUser(user.to_string()));
        }
        let spec = self.expand(user);
        tracing::debug!("Resolved `{}` for {}", spec, user);
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_template() {
        let resolver = TemplateResolver::new(CommandConfig::default());
        let spec = resolver
            .resolve(&"hello-minikube-938614450-z5tbt".into())
            .await
            .unwrap();

        assert_eq!(spec.program, "kubectl");
        assert_eq!(
            spec.args,
            vec!["exec", "-it", "hello-minikube-938614450-z5tbt", "/bin/bash"]
        );
        assert!(spec
            .env
            .contains(&("TERM".to_string(), "xterm-256color".to_string())));
    }

    #[tokio::test]
    async fn test_placeholder_inside_argument() {
        let template = CommandConfig {
            program: "ssh".to_string(),
            args: vec!["{user}@backend".to_string(), "-t".to_string()],
            env: Default::default(),
            cwd: Some("/tmp".into()),
        };
        let spec = TemplateResolver::new(template)
            .resolve(&"bob".into())
            .await
            .unwrap();

        assert_eq!(spec.args, vec!["bob@backend", "-t"]);
        assert_eq!(spec.cwd, Some("/tmp".into()));
        assert!(spec.env.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_unsafe_users() {
        let resolver = TemplateResolver::new(CommandConfig::default());
        for user in ["", "-n", "pod;reboot", "a b"] {
            assert!(matches!(
                resolver.resolve(&user.into()).await,
                Err(ResolveError::InvalidUser(_))
            ));
        }
    }
}
