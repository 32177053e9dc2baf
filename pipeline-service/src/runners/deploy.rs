// Deploy Executor
// Builds a deployment config from step parameters and hands it to a deployer

use crate::collaborators::{Deployer, DeploymentConfig};
use crate::pipeline::models::{StepDefinition, StepRun};
use crate::pipeline::params::{decode, DeployParams};
use crate::runners::{StepContext, StepError, StepExecutor};

use std::sync::Arc;

pub struct DeployExecutor {
    deployer: Option<Arc<dyn Deployer>>,
}

impl DeployExecutor {
    pub fn new(deployer: Option<Arc<dyn Deployer>>) -> Self {
        Self { deployer }
    }
}

fn deployment_config(params: DeployParams, ctx: &StepContext) -> DeploymentConfig {
    DeploymentConfig {
        application: params
            .application
            .unwrap_or_else(|| ctx.pipeline_id.clone()),
        image: params.image,
        environment: params
            .environment
            .unwrap_or_else(|| ctx.environment.clone()),
        replicas: params.replicas,
        port: params.port,
        namespace: params.namespace,
    }
}

#[async_trait::async_trait]
impl StepExecutor for DeployExecutor {
    async fn execute(
        &self,
        step: &StepDefinition,
        step_run: &mut StepRun,
        ctx: &StepContext,
    ) -> Result<(), StepError> {
        let deployer = self.deployer.as_ref().ok_or_else(|| {
            StepError::Unconfigured("no deployer configured for deploy steps".to_string())
        })?;

        let params: DeployParams = decode(&step.params).map_err(StepError::InvalidParams)?;
        let config = deployment_config(params, ctx);

        step_run.log(format!(
            "Deploying {} ({}) to {} with {} replica(s)",
            config.application, config.image, config.environment, config.replicas
        ));

        let receipt = deployer.deploy(&config).await?;

        step_run.log(format!(
            "Deployment {} succeeded: {}",
            receipt.deployment_id, receipt.message
        ));
        step_run.outputs.insert(
            "deployment".to_string(),
            serde_json::to_value(&receipt).unwrap_or_default(),
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::DeploymentReceipt;
    use crate::error::CollaboratorError;
    use crate::runners::tests::{context, step};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingDeployer {
        seen: Mutex<Vec<DeploymentConfig>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl Deployer for RecordingDeployer {
        async fn deploy(
            &self,
            config: &DeploymentConfig,
        ) -> Result<DeploymentReceipt, CollaboratorError> {
            self.seen.lock().unwrap().push(config.clone());
            if self.fail {
                return Err(CollaboratorError::Deployment("cluster unreachable".to_string()));
            }
            Ok(DeploymentReceipt {
                deployment_id: "dep-1".to_string(),
                message: "rolled out".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_deploy_uses_run_environment() {
        let deployer = Arc::new(RecordingDeployer::default());
        let executor = DeployExecutor::new(Some(deployer.clone() as Arc<dyn Deployer>));
        let step = step("deploy", serde_json::json!({ "image": "web:2.0", "replicas": 3 }));
        let mut run = StepRun::pending(&step);

        executor.execute(&step, &mut run, &context()).await.unwrap();

        let seen = deployer.seen.lock().unwrap();
        assert_eq!(seen[0].application, "web");
        assert_eq!(seen[0].environment, "staging");
        assert_eq!(seen[0].replicas, 3);
        assert_eq!(run.outputs["deployment"]["deploymentId"], "dep-1");
        assert!(run.logs.last().unwrap().contains("succeeded"));
    }

    #[tokio::test]
    async fn test_deployer_failure_fails_step() {
        let deployer = Arc::new(RecordingDeployer {
            fail: true,
            ..Default::default()
        });
        let executor = DeployExecutor::new(Some(deployer as Arc<dyn Deployer>));
        let step = step("deploy", serde_json::json!({ "image": "web:2.0" }));
        let mut run = StepRun::pending(&step);

        let err = executor
            .execute(&step, &mut run, &context())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cluster unreachable"));
    }
}
